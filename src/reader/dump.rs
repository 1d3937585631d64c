//! Raw sample dump files
//!
//! A dump is the plain sample stream of one channel, little-endian `u16`,
//! without any header.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Write a sample stream to `path`
pub fn write_samples<P: AsRef<Path>>(path: P, samples: &[u16]) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for sample in samples {
        writer.write_all(&sample.to_le_bytes())?;
    }
    writer.flush()
}

/// Read a sample stream from `path`; a trailing odd byte is dropped
pub fn read_samples<P: AsRef<Path>>(path: P) -> std::io::Result<Vec<u16>> {
    let mut bytes = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut bytes)?;
    Ok(bytes
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect())
}

/// File name of one channel's dump: `base` itself for a single channel,
/// otherwise `stem_chN.ext`
pub fn channel_path<P: AsRef<Path>>(base: P, channel: usize, n_channels: usize) -> PathBuf {
    let base = base.as_ref();
    if n_channels <= 1 {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{}_ch{}.{}", stem, channel, ext.to_string_lossy()),
        None => format!("{}_ch{}", stem, channel),
    };
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let path = std::env::temp_dir().join(format!("pxar_dump_{}.dat", std::process::id()));
        let samples = vec![0xa005, 0x8003, 0x5fff, 0xe002, 0xc001];
        write_samples(&path, &samples).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0x05, 0xa0]);
        assert_eq!(read_samples(&path).unwrap(), samples);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_channel_path() {
        assert_eq!(channel_path("run/raw.dat", 0, 1), PathBuf::from("run/raw.dat"));
        assert_eq!(channel_path("run/raw.dat", 1, 2), PathBuf::from("run/raw_ch1.dat"));
        assert_eq!(channel_path("raw", 0, 2), PathBuf::from("raw_ch0"));
    }

    #[test]
    fn test_missing_file() {
        assert!(read_samples("/nonexistent/raw.dat").is_err());
    }
}
