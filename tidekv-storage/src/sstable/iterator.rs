//! SSTable iterator implementation

use crate::sstable::SSTable;

/// Forward iterator over an SSTable's entries, borrowing from its mapping
pub struct SSTableIterator<'a> {
    table: &'a SSTable,
    block: usize,
    entry: usize,
    remaining: usize,
}

impl<'a> SSTableIterator<'a> {
    pub(crate) fn new(table: &'a SSTable) -> Self {
        Self {
            table,
            block: 0,
            entry: 0,
            remaining: table.entry_count() as usize,
        }
    }
}

impl<'a> Iterator for SSTableIterator<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let table: &'a SSTable = self.table;
        loop {
            let block = table.blocks().get(self.block)?;
            if let Some(entry) = block.entries.get(self.entry) {
                self.entry += 1;
                self.remaining -= 1;
                return Some((table.bytes(&entry.key), table.bytes(&entry.value)));
            }
            self.block += 1;
            self.entry = 0;
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for SSTableIterator<'_> {}
