use bytes::Bytes;

use futures_util::future::BoxFuture;

use crate::error::Result;

/// Access to the storage of a device.
///
/// The device handle only carries this capability. Implementations wrap the
/// encrypted file-transfer channel offered by the printer and report their
/// failures as [`crate::error::ErrorKind::FileTransfer`] errors.
pub trait FileTransfer: Send + Sync {
    /// Stores `data` at `path`, replacing any existing file.
    fn store<'a>(&'a self, path: &'a str, data: Bytes) -> BoxFuture<'a, Result<()>>;

    /// Retrieves the content of the file at `path`.
    fn retrieve<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Bytes>>;

    /// Lists the entries of the directory at `path`.
    fn list<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Vec<String>>>;

    /// Deletes the file at `path`.
    fn delete<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<()>>;
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;

    use futures_util::future::BoxFuture;

    use hashbrown::HashMap;

    use crate::error::{Error, ErrorKind, Result};

    use super::FileTransfer;

    /// Keeps files in memory.
    #[derive(Default)]
    pub(crate) struct MemoryStorage {
        files: Mutex<HashMap<String, Bytes>>,
    }

    fn missing(path: &str) -> Error {
        Error::new(ErrorKind::FileTransfer, format!("No file at `{path}`"))
    }

    impl FileTransfer for MemoryStorage {
        fn store<'a>(&'a self, path: &'a str, data: Bytes) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.files.lock().unwrap().insert(path.to_owned(), data);
                Ok(())
            })
        }

        fn retrieve<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Bytes>> {
            Box::pin(async move {
                self.files
                    .lock()
                    .unwrap()
                    .get(path)
                    .cloned()
                    .ok_or_else(|| missing(path))
            })
        }

        fn list<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
            Box::pin(async move {
                let prefix = format!("{}/", path.trim_end_matches('/'));
                let mut entries: Vec<String> = self
                    .files
                    .lock()
                    .unwrap()
                    .keys()
                    .filter_map(|name| name.strip_prefix(&prefix))
                    .map(str::to_owned)
                    .collect();
                entries.sort();
                Ok(entries)
            })
        }

        fn delete<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.files
                    .lock()
                    .unwrap()
                    .remove(path)
                    .map(|_| ())
                    .ok_or_else(|| missing(path))
            })
        }
    }

    #[tokio::test]
    async fn storage_round() {
        let storage = MemoryStorage::default();

        storage
            .store("/cache/a.3mf", Bytes::from_static(b"a"))
            .await
            .unwrap();
        storage
            .store("/cache/b.gcode", Bytes::from_static(b"b"))
            .await
            .unwrap();

        assert_eq!(
            storage.list("/cache").await.unwrap(),
            vec!["a.3mf", "b.gcode"]
        );
        assert_eq!(
            storage.retrieve("/cache/a.3mf").await.unwrap(),
            Bytes::from_static(b"a")
        );

        storage.delete("/cache/a.3mf").await.unwrap();
        assert_eq!(
            storage.retrieve("/cache/a.3mf").await.unwrap_err().kind(),
            ErrorKind::FileTransfer
        );
    }
}
