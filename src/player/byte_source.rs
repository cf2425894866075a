use crate::core::{log_ctx, Result};
use log::info;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// 拉取式字节源
///
/// 解封装器通过自定义 I/O 适配器从这里读取数据，`read` / `seek` 可以阻塞。
/// 返回 0 表示到达末尾。
pub trait ByteSource: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// 总大小（未知时返回 None）
    fn size(&mut self) -> Option<u64> {
        None
    }

    fn description(&self) -> String;
}

/// 本地文件字节源
pub struct FileSource {
    reader: BufReader<File>,
    path: PathBuf,
    size: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        info!("{} 📁 打开本地文件: {} ({} 字节)", log_ctx(), path.display(), size);
        Ok(Self {
            reader: BufReader::with_capacity(256 * 1024, file),
            path,
            size,
        })
    }
}

impl ByteSource for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.reader.read(buf)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.reader.seek(pos)?)
    }

    fn size(&mut self) -> Option<u64> {
        Some(self.size)
    }

    fn description(&self) -> String {
        format!("file://{}", self.path.display())
    }
}

/// 内存字节源
pub struct MemorySource {
    cursor: Cursor<Vec<u8>>,
    name: String,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(data),
            name: name.into(),
        }
    }
}

impl ByteSource for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.cursor.read(buf)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.cursor.seek(pos)?)
    }

    fn size(&mut self) -> Option<u64> {
        Some(self.cursor.get_ref().len() as u64)
    }

    fn description(&self) -> String {
        format!("memory://{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_read_and_seek() {
        let mut source = MemorySource::new("t", (0u8..100).collect());
        let mut buf = [0u8; 10];
        assert_eq!(source.read(&mut buf).unwrap(), 10);
        assert_eq!(buf[9], 9);
        assert_eq!(source.seek(SeekFrom::End(-5)).unwrap(), 95);
        assert_eq!(source.read(&mut buf).unwrap(), 5);
        assert_eq!(source.read(&mut buf).unwrap(), 0);
        assert_eq!(source.size(), Some(100));
    }

    #[test]
    fn test_file_source() {
        let path = std::env::temp_dir().join(format!("myy_engine_bytes_{}.bin", std::process::id()));
        std::fs::write(&path, b"hello world").unwrap();
        let mut source = FileSource::open(&path).unwrap();
        assert_eq!(source.size(), Some(11));
        source.seek(SeekFrom::Start(6)).unwrap();
        let mut buf = [0u8; 16];
        let n = source.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"world");
        let _ = std::fs::remove_file(&path);
        assert!(FileSource::open("/definitely/not/here.mp4").is_err());
    }
}
