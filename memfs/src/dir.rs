use crate::fs::FsError;
use crate::node::{FileType, Inode};

/// Longest permitted entry name, in bytes.
pub const NAME_MAX: usize = 255;

const DIRENT_HEADER_LEN: u16 = 8;

/// One name-to-inode binding inside a directory. Entries are immutable;
/// a rename is modelled as remove-then-add, never in-place mutation, so the
/// record length is computed once here and never again.
#[derive(Debug, Clone)]
pub struct DirEntry {
    ino: u32,
    rec_len: u16,
    name_len: u8,
    file_type: u8,
    name: String,
}

impl DirEntry {
    pub fn new(ino: u32, name: &str, ftype: FileType) -> Self {
        assert!(!name.is_empty() && name.len() <= NAME_MAX);
        // On-disk records are 4-byte aligned: fixed header plus padded name.
        let rec_len = DIRENT_HEADER_LEN + ((name.len() as u16 + 3) & !3);
        Self {
            ino,
            rec_len,
            name_len: name.len() as u8,
            file_type: ftype.dirent_tag(),
            name: name.to_string(),
        }
    }

    pub fn ino(&self) -> u32 {
        self.ino
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_len(&self) -> u8 {
        self.name_len
    }

    pub fn file_type(&self) -> u8 {
        self.file_type
    }

    pub fn rec_len(&self) -> u16 {
        self.rec_len
    }
}

/// The entry list of one directory-typed inode. `.` and `..` are seeded at
/// construction and can never be removed; every other name is unique within
/// the directory.
///
/// The list does not reach back into the owning inode: callers pair entry
/// mutations with a modified-time update on the inode themselves.
#[derive(Debug)]
pub struct Directory {
    ino: u32,
    entries: Vec<DirEntry>,
}

impl Directory {
    /// Wraps a directory-typed inode, seeding `.` with the inode's own number
    /// and `..` with `parent`. Handing in any other inode type is a caller
    /// bug and fails construction outright.
    pub fn new(inode: &Inode, parent: u32) -> Result<Self, FsError> {
        if inode.file_type() != FileType::Directory {
            return Err(FsError::InvalidArgument(
                "inode must be a directory".to_string(),
            ));
        }

        let entries = vec![
            DirEntry::new(inode.ino(), ".", FileType::Directory),
            DirEntry::new(parent, "..", FileType::Directory),
        ];
        Ok(Self {
            ino: inode.ino(),
            entries,
        })
    }

    /// Inode number of the directory these entries belong to.
    pub fn ino(&self) -> u32 {
        self.ino
    }

    /// Appends an entry unless the name is already taken. Returns whether the
    /// entry went in.
    pub fn add_entry(&mut self, entry: DirEntry) -> bool {
        if self.entries.iter().any(|e| e.name() == entry.name()) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Removes the entry with the given name. `.` and `..` are refused.
    pub fn remove_entry(&mut self, name: &str) -> bool {
        if name == "." || name == ".." {
            return false;
        }
        let before = self.entries.len();
        self.entries.retain(|e| e.name() != name);
        self.entries.len() != before
    }

    /// Case-sensitive linear lookup.
    pub fn find_entry(&self, name: &str) -> Option<&DirEntry> {
        self.entries.iter().find(|e| e.name() == name)
    }

    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir_inode(ino: u32) -> Inode {
        Inode::new(ino, FileType::Directory, 0, 0, 0)
    }

    #[test]
    fn wrapping_a_non_directory_inode_is_an_error() {
        let file = Inode::new(3, FileType::RegularFile, 0, 0, 0);

        match Directory::new(&file, 2) {
            Err(FsError::InvalidArgument(_)) => (),
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
    }

    #[test]
    fn dot_entries_are_seeded_at_construction() {
        let dir = Directory::new(&dir_inode(5), 2).unwrap();

        assert_eq!(dir.find_entry(".").unwrap().ino(), 5);
        assert_eq!(dir.find_entry("..").unwrap().ino(), 2);
        assert_eq!(dir.entries().len(), 2);
    }

    #[test]
    fn duplicate_names_never_change_the_entry_count() {
        let mut dir = Directory::new(&dir_inode(5), 2).unwrap();

        assert!(dir.add_entry(DirEntry::new(9, "notes", FileType::RegularFile)));
        let count = dir.entries().len();

        assert!(!dir.add_entry(DirEntry::new(10, "notes", FileType::RegularFile)));
        assert_eq!(dir.entries().len(), count);
        // The first binding survives.
        assert_eq!(dir.find_entry("notes").unwrap().ino(), 9);
    }

    #[test]
    fn dot_entries_survive_removal_attempts() {
        let mut dir = Directory::new(&dir_inode(5), 2).unwrap();

        assert!(!dir.remove_entry("."));
        assert!(!dir.remove_entry(".."));
        assert_eq!(dir.entries().len(), 2);
    }

    #[test]
    fn remove_deletes_the_single_match() {
        let mut dir = Directory::new(&dir_inode(5), 2).unwrap();
        dir.add_entry(DirEntry::new(9, "a.txt", FileType::RegularFile));
        dir.add_entry(DirEntry::new(10, "b.txt", FileType::RegularFile));

        assert!(dir.remove_entry("a.txt"));
        assert!(dir.find_entry("a.txt").is_none());
        assert!(dir.find_entry("b.txt").is_some());
        assert!(!dir.remove_entry("a.txt"));
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let mut dir = Directory::new(&dir_inode(5), 2).unwrap();
        dir.add_entry(DirEntry::new(9, "Readme", FileType::RegularFile));

        assert!(dir.find_entry("readme").is_none());
        assert!(dir.find_entry("Readme").is_some());
    }

    #[test]
    fn record_length_is_header_plus_padded_name() {
        // 8-byte header plus the name padded to a 4-byte boundary.
        assert_eq!(DirEntry::new(1, "a", FileType::RegularFile).rec_len(), 12);
        assert_eq!(DirEntry::new(1, "abcd", FileType::RegularFile).rec_len(), 12);
        assert_eq!(DirEntry::new(1, "abcde", FileType::RegularFile).rec_len(), 16);
        assert_eq!(DirEntry::new(1, "..", FileType::Directory).name_len(), 2);
    }
}
