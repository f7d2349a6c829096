//! 以目录为后端的文件存储。文件以生成的UUID为键。
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum Error {
    NotFound(String),
    InvalidKey(String),
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(key) => write!(f, "File {key} not found"),
            Self::InvalidKey(key) => write!(f, "Invalid file key {key}"),
            Self::Io(e) => write!(f, "File store error: {e}"),
        }
    }
}
impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, Error> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// 保存文件内容并返回新的文件键
    pub async fn store(&self, bytes: &[u8]) -> Result<String, Error> {
        let key = uuid::Uuid::new_v4().to_string();
        tokio::fs::write(self.root.join(&key), bytes).await?;
        tracing::debug!("Stored {} bytes as {key}", bytes.len());
        Ok(key)
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>, Error> {
        let path = self.path_of(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 删除文件。文件不存在时视为成功。
    pub async fn delete(&self, key: &str) -> Result<(), Error> {
        let path = self.path_of(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("待删除的文件{key}不存在");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn path_of(&self, key: &str) -> Result<PathBuf, Error> {
        if !is_valid_key(key) {
            return Err(Error::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

/// 文件键必须是`store`生成的连字符形式UUID，保证不会越出存储目录
pub fn is_valid_key(key: &str) -> bool {
    key.len() == uuid::fmt::Hyphenated::LENGTH && uuid::Uuid::try_parse(key).is_ok()
}

#[cfg(test)]
mod tests {
    use super::{Error, FileStore};

    #[tokio::test]
    async fn test_store_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("files")).unwrap();

        let key = store.store(b"hello knowledge").await.unwrap();
        assert_eq!(store.read(&key).await.unwrap(), b"hello knowledge");

        store.delete(&key).await.unwrap();
        assert!(matches!(store.read(&key).await, Err(Error::NotFound(_))));
        // 重复删除不报错
        store.delete(&key).await.unwrap();
    }

    #[test]
    fn test_key_format() {
        let key = uuid::Uuid::new_v4().to_string();
        assert!(super::is_valid_key(&key));
        assert!(!super::is_valid_key("legacy_key.txt"));
        assert!(!super::is_valid_key(""));
        // 其它UUID写法不是store生成的键
        assert!(!super::is_valid_key(&key.replace('-', "")));
        assert!(!super::is_valid_key(&format!("{{{key}}}")));
    }

    #[tokio::test]
    async fn test_reject_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.read("../etc/passwd").await,
            Err(Error::InvalidKey(_))
        ));
    }
}
