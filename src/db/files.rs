//! File-state rows: one row per indexed Markdown file.

use super::IndexStore;
use crate::error::Result;
use rusqlite::params;

/// Tracked attributes of an indexed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub hash: String,
    pub mtime: i64,
    pub size: i64,
}

impl IndexStore {
    /// Insert or replace the state row for `path`.
    pub fn upsert_file(&self, record: &FileRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO files (path, hash, mtime, size) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
               hash = excluded.hash, mtime = excluded.mtime, size = excluded.size",
            params![record.path, record.hash, record.mtime, record.size],
        )?;
        Ok(())
    }

    /// Update only `(mtime, size)` — used when the content hash is
    /// unchanged but the filesystem metadata moved.
    pub fn touch_file(&self, path: &str, mtime: i64, size: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE files SET mtime = ?2, size = ?3 WHERE path = ?1",
            params![path, mtime, size],
        )?;
        Ok(())
    }

    pub fn get_file(&self, path: &str) -> Result<Option<FileRecord>> {
        let result = self.conn.query_row(
            "SELECT path, hash, mtime, size FROM files WHERE path = ?1",
            [path],
            |row| {
                Ok(FileRecord {
                    path: row.get(0)?,
                    hash: row.get(1)?,
                    mtime: row.get(2)?,
                    size: row.get(3)?,
                })
            },
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_files(&self) -> Result<Vec<FileRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, hash, mtime, size FROM files ORDER BY path")?;
        let records = stmt
            .query_map([], |row| {
                Ok(FileRecord {
                    path: row.get(0)?,
                    hash: row.get(1)?,
                    mtime: row.get(2)?,
                    size: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn delete_file(&self, path: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM files WHERE path = ?1", [path])?;
        Ok(())
    }

    pub fn delete_all_files(&self) -> Result<()> {
        self.conn.execute("DELETE FROM files", [])?;
        Ok(())
    }

    pub fn file_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_get_touch_delete() {
        let store = IndexStore::open_in_memory().unwrap();
        let record = FileRecord {
            path: "memory/a.md".into(),
            hash: "h1".into(),
            mtime: 100,
            size: 5,
        };
        store.upsert_file(&record).unwrap();
        assert_eq!(store.get_file("memory/a.md").unwrap(), Some(record));

        store.touch_file("memory/a.md", 200, 7).unwrap();
        let touched = store.get_file("memory/a.md").unwrap().unwrap();
        assert_eq!(touched.hash, "h1");
        assert_eq!(touched.mtime, 200);
        assert_eq!(touched.size, 7);

        store.delete_file("memory/a.md").unwrap();
        assert_eq!(store.get_file("memory/a.md").unwrap(), None);
    }
}
