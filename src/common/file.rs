use super::{Error, Result};
use std::path::PathBuf;

const TABLE_FILE_EXT: &str = "sst";

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum DBFile {
    Current,
    Descriptor(u64),
    Table(u64),
    LogFile(u64),
}

pub fn make_current_file(path: &str) -> PathBuf {
    PathBuf::from(format!("{}/CURRENT", path))
}

pub fn make_descriptor_file_name(path: &str, number: u64) -> PathBuf {
    PathBuf::from(format!("{}/MANIFEST-{:06}", path, number))
}

pub fn make_file_name(path: &str, number: u64, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}/{:06}.{}", path, number, suffix))
}

pub fn make_log_file(path: &str, number: u64) -> PathBuf {
    make_file_name(path, number, "log")
}

pub fn make_table_file_name(path: &str, number: u64) -> PathBuf {
    make_file_name(path, number, TABLE_FILE_EXT)
}

pub fn parse_file_name(fname: &str) -> Result<DBFile> {
    if fname == "CURRENT" {
        return Ok(DBFile::Current);
    }
    if let Some(rest) = fname.strip_prefix("MANIFEST-") {
        let n = rest.parse::<u64>().map_err(|e| {
            Error::InvalidFile(format!("can not parse manifest file {}, Error: {:?}", fname, e))
        })?;
        return Ok(DBFile::Descriptor(n));
    }
    if let Some(rest) = fname.strip_suffix(".log") {
        let n = rest.parse::<u64>().map_err(|e| {
            Error::InvalidFile(format!("can not parse log file {}, Error: {:?}", fname, e))
        })?;
        return Ok(DBFile::LogFile(n));
    }
    if let Some(rest) = fname.strip_suffix(".sst") {
        let n = rest.parse::<u64>().map_err(|e| {
            Error::InvalidFile(format!("can not parse table file {}, Error: {:?}", fname, e))
        })?;
        return Ok(DBFile::Table(n));
    }
    Err(Error::InvalidFile(format!("can not parse file {}", fname)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names() {
        let p = make_descriptor_file_name("/data/db", 123);
        let m = PathBuf::from("/data/db/MANIFEST-000123");
        assert_eq!(p, m);
        assert_eq!(
            parse_file_name(m.file_name().unwrap().to_str().unwrap()).unwrap(),
            DBFile::Descriptor(123)
        );
        let t = make_table_file_name("/data/db", 7);
        assert_eq!(t, PathBuf::from("/data/db/000007.sst"));
        assert_eq!(
            parse_file_name(t.file_name().unwrap().to_str().unwrap()).unwrap(),
            DBFile::Table(7)
        );
        assert_eq!(parse_file_name("CURRENT").unwrap(), DBFile::Current);
        assert!(parse_file_name("garbage").is_err());
    }
}
