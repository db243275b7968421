//! Streaming reader for NAR (Nix ARchive) streams.
//!
//! A NAR is a sequence of length-prefixed, 8-byte-padded strings encoding a
//! file tree of regular files, symlinks, and directories. The reader walks
//! the archive entry by entry without materialising file contents, which is
//! what the maintenance integrity checks need: a full structural validation
//! of the reconstituted byte stream.

use std::fmt;
use std::io::Read;

/// Upper bound on token, name, and symlink-target strings. File contents are
/// streamed and skipped, so only structural strings are allocated.
const MAX_SMALL_STRING: u64 = 4096;

/// Maximum directory nesting the reader will follow.
const MAX_DEPTH: usize = 256;

/// One entry in a NAR archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NarEntry {
    /// Absolute path within the archive; the root node is `/`.
    pub path: String,
    /// The entry's node kind.
    pub kind: NarEntryKind,
}

/// Node kinds a NAR can contain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NarEntryKind {
    Regular { size: u64, executable: bool },
    Symlink { target: String },
    Directory,
}

impl fmt::Display for NarEntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regular { .. } => write!(f, "regular"),
            Self::Symlink { .. } => write!(f, "symlink"),
            Self::Directory => write!(f, "directory"),
        }
    }
}

/// An open directory node whose entries are still being read.
struct DirFrame {
    path: String,
    /// Whether the node sits inside an `entry` wrapper whose closing
    /// parenthesis must be consumed when the node ends.
    wrapped: bool,
    /// Last entry name seen; NAR requires strictly increasing names.
    prev_name: Option<String>,
}

enum State {
    Start,
    Walking,
    Finished,
}

/// Streaming NAR reader over any `Read`.
pub struct NarReader<R: Read> {
    inner: R,
    stack: Vec<DirFrame>,
    state: State,
}

impl<R: Read> NarReader<R> {
    /// Create a reader. The magic token is read on the first
    /// [`next_entry`](Self::next_entry) call.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            stack: Vec::new(),
            state: State::Start,
        }
    }

    /// Read the next entry, or `None` once the archive is complete.
    pub fn next_entry(&mut self) -> crate::Result<Option<NarEntry>> {
        match self.state {
            State::Start => {
                self.expect_token("nix-archive-1")?;
                self.state = State::Walking;
                let entry = self.read_node("/".to_string(), false)?;
                if self.stack.is_empty() {
                    self.finish()?;
                }
                Ok(Some(entry))
            }
            State::Walking => self.walk(),
            State::Finished => Ok(None),
        }
    }

    fn walk(&mut self) -> crate::Result<Option<NarEntry>> {
        loop {
            let Some(top) = self.stack.last() else {
                return Ok(None);
            };
            let parent_path = top.path.clone();

            let token = self.read_small_string()?;
            match token.as_str() {
                "entry" => {
                    self.expect_token("(")?;
                    self.expect_token("name")?;
                    let name = self.read_small_string()?;
                    validate_entry_name(&name)?;
                    if let Some(frame) = self.stack.last_mut() {
                        if let Some(prev) = &frame.prev_name {
                            if name.as_str() <= prev.as_str() {
                                return Err(crate::Error::NarParse(format!(
                                    "directory entries out of order: {name:?} after {prev:?}"
                                )));
                            }
                        }
                        frame.prev_name = Some(name.clone());
                    }
                    self.expect_token("node")?;

                    let path = if parent_path == "/" {
                        format!("/{name}")
                    } else {
                        format!("{parent_path}/{name}")
                    };
                    let entry = self.read_node(path, true)?;
                    return Ok(Some(entry));
                }
                ")" => {
                    if let Some(frame) = self.stack.pop() {
                        if frame.wrapped {
                            self.expect_token(")")?;
                        }
                    }
                    if self.stack.is_empty() {
                        self.finish()?;
                        return Ok(None);
                    }
                }
                other => {
                    return Err(crate::Error::NarParse(format!(
                        "expected 'entry' or ')', got {other:?}"
                    )));
                }
            }
        }
    }

    /// Read one node. Regular and symlink nodes are fully consumed, closing
    /// parentheses included; a directory node leaves its entries pending on
    /// the frame stack.
    fn read_node(&mut self, path: String, wrapped: bool) -> crate::Result<NarEntry> {
        self.expect_token("(")?;
        self.expect_token("type")?;
        let node_type = self.read_small_string()?;

        let kind = match node_type.as_str() {
            "regular" => {
                let mut executable = false;
                let mut token = self.read_small_string()?;
                if token == "executable" {
                    let marker = self.read_small_string()?;
                    if !marker.is_empty() {
                        return Err(crate::Error::NarParse(
                            "executable marker must be empty".to_string(),
                        ));
                    }
                    executable = true;
                    token = self.read_small_string()?;
                }
                if token != "contents" {
                    return Err(crate::Error::NarParse(format!(
                        "expected 'contents', got {token:?}"
                    )));
                }
                let size = self.skip_contents()?;
                self.close_node(wrapped)?;
                NarEntryKind::Regular { size, executable }
            }
            "symlink" => {
                self.expect_token("target")?;
                let target = self.read_small_string()?;
                if target.is_empty() {
                    return Err(crate::Error::NarParse(
                        "symlink target must not be empty".to_string(),
                    ));
                }
                self.close_node(wrapped)?;
                NarEntryKind::Symlink { target }
            }
            "directory" => {
                if self.stack.len() >= MAX_DEPTH {
                    return Err(crate::Error::NarParse(format!(
                        "directory nesting exceeds {MAX_DEPTH}"
                    )));
                }
                self.stack.push(DirFrame {
                    path: path.clone(),
                    wrapped,
                    prev_name: None,
                });
                NarEntryKind::Directory
            }
            other => {
                return Err(crate::Error::NarParse(format!(
                    "unknown node type: {other:?}"
                )));
            }
        };

        Ok(NarEntry { path, kind })
    }

    fn close_node(&mut self, wrapped: bool) -> crate::Result<()> {
        self.expect_token(")")?;
        if wrapped {
            self.expect_token(")")?;
        }
        Ok(())
    }

    fn finish(&mut self) -> crate::Result<()> {
        self.state = State::Finished;
        let mut byte = [0u8; 1];
        match self.inner.read(&mut byte) {
            Ok(0) => Ok(()),
            Ok(_) => Err(crate::Error::NarParse(
                "trailing data after archive".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn read_u64(&mut self) -> crate::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> crate::Result<()> {
        self.inner.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                crate::Error::NarParse("unexpected end of archive".to_string())
            } else {
                e.into()
            }
        })
    }

    fn read_small_string(&mut self) -> crate::Result<String> {
        let len = self.read_u64()?;
        if len > MAX_SMALL_STRING {
            return Err(crate::Error::NarParse(format!(
                "string of {len} bytes exceeds limit"
            )));
        }
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf)?;
        self.read_padding(len)?;
        String::from_utf8(buf)
            .map_err(|_| crate::Error::NarParse("string is not valid UTF-8".to_string()))
    }

    fn expect_token(&mut self, expected: &str) -> crate::Result<()> {
        let token = self.read_small_string()?;
        if token != expected {
            return Err(crate::Error::NarParse(format!(
                "expected {expected:?}, got {token:?}"
            )));
        }
        Ok(())
    }

    /// Skip a regular file's contents, returning its length.
    fn skip_contents(&mut self) -> crate::Result<u64> {
        let len = self.read_u64()?;
        let mut remaining = len;
        let mut buf = [0u8; 8192];
        while remaining > 0 {
            let take = remaining.min(buf.len() as u64) as usize;
            self.read_exact(&mut buf[..take])?;
            remaining -= take as u64;
        }
        self.read_padding(len)?;
        Ok(len)
    }

    /// Consume zero padding up to the next 8-byte boundary.
    fn read_padding(&mut self, len: u64) -> crate::Result<()> {
        let pad = (8 - (len % 8) as usize) % 8;
        if pad == 0 {
            return Ok(());
        }
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf[..pad])?;
        if buf[..pad].iter().any(|b| *b != 0) {
            return Err(crate::Error::NarParse("nonzero padding".to_string()));
        }
        Ok(())
    }
}

fn validate_entry_name(name: &str) -> crate::Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(crate::Error::NarParse(format!(
            "invalid entry name: {name:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn put_str(out: &mut Vec<u8>, s: &[u8]) {
        out.extend_from_slice(&(s.len() as u64).to_le_bytes());
        out.extend_from_slice(s);
        let pad = (8 - s.len() % 8) % 8;
        out.extend_from_slice(&vec![0u8; pad]);
    }

    fn regular_node(out: &mut Vec<u8>, contents: &[u8], executable: bool) {
        put_str(out, b"(");
        put_str(out, b"type");
        put_str(out, b"regular");
        if executable {
            put_str(out, b"executable");
            put_str(out, b"");
        }
        put_str(out, b"contents");
        put_str(out, contents);
        put_str(out, b")");
    }

    fn file_nar(contents: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        put_str(&mut out, b"nix-archive-1");
        regular_node(&mut out, contents, false);
        out
    }

    fn dir_nar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        put_str(&mut out, b"nix-archive-1");
        put_str(&mut out, b"(");
        put_str(&mut out, b"type");
        put_str(&mut out, b"directory");
        for (name, contents) in entries {
            put_str(&mut out, b"entry");
            put_str(&mut out, b"(");
            put_str(&mut out, b"name");
            put_str(&mut out, name.as_bytes());
            put_str(&mut out, b"node");
            regular_node(&mut out, contents, false);
            put_str(&mut out, b")");
        }
        put_str(&mut out, b")");
        out
    }

    fn collect(bytes: &[u8]) -> crate::Result<Vec<NarEntry>> {
        let mut reader = NarReader::new(Cursor::new(bytes));
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    #[test]
    fn test_single_file() {
        let entries = collect(&file_nar(b"hello world, this spans padding")).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "/");
        assert_eq!(
            entries[0].kind,
            NarEntryKind::Regular {
                size: 31,
                executable: false
            }
        );
    }

    #[test]
    fn test_executable_file() {
        let mut out = Vec::new();
        put_str(&mut out, b"nix-archive-1");
        regular_node(&mut out, b"#!/bin/sh\n", true);
        let entries = collect(&out).unwrap();
        assert_eq!(
            entries[0].kind,
            NarEntryKind::Regular {
                size: 10,
                executable: true
            }
        );
    }

    #[test]
    fn test_symlink_root() {
        let mut out = Vec::new();
        put_str(&mut out, b"nix-archive-1");
        put_str(&mut out, b"(");
        put_str(&mut out, b"type");
        put_str(&mut out, b"symlink");
        put_str(&mut out, b"target");
        put_str(&mut out, b"/nix/store/somewhere");
        put_str(&mut out, b")");
        let entries = collect(&out).unwrap();
        assert_eq!(
            entries[0].kind,
            NarEntryKind::Symlink {
                target: "/nix/store/somewhere".to_string()
            }
        );
    }

    #[test]
    fn test_directory_entries_and_paths() {
        let entries = collect(&dir_nar(&[("alpha", b"a"), ("beta", b"bb")])).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].path, "/");
        assert_eq!(entries[0].kind, NarEntryKind::Directory);
        assert_eq!(entries[1].path, "/alpha");
        assert_eq!(entries[2].path, "/beta");
    }

    #[test]
    fn test_nested_directory() {
        let mut out = Vec::new();
        put_str(&mut out, b"nix-archive-1");
        put_str(&mut out, b"(");
        put_str(&mut out, b"type");
        put_str(&mut out, b"directory");
        put_str(&mut out, b"entry");
        put_str(&mut out, b"(");
        put_str(&mut out, b"name");
        put_str(&mut out, b"sub");
        put_str(&mut out, b"node");
        put_str(&mut out, b"(");
        put_str(&mut out, b"type");
        put_str(&mut out, b"directory");
        put_str(&mut out, b"entry");
        put_str(&mut out, b"(");
        put_str(&mut out, b"name");
        put_str(&mut out, b"file");
        put_str(&mut out, b"node");
        regular_node(&mut out, b"deep", false);
        put_str(&mut out, b")");
        put_str(&mut out, b")");
        put_str(&mut out, b")");
        put_str(&mut out, b")");
        let entries = collect(&out).unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/sub", "/sub/file"]);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut out = Vec::new();
        put_str(&mut out, b"not-an-archive");
        assert!(collect(&out).is_err());
    }

    #[test]
    fn test_rejects_truncated_contents() {
        let mut nar = file_nar(b"some longer file contents here");
        nar.truncate(nar.len() - 12);
        assert!(collect(&nar).is_err());
    }

    #[test]
    fn test_error_surfaces_after_valid_entries() {
        // A directory NAR truncated inside its second entry still yields
        // the entries before the damage.
        let nar = dir_nar(&[("alpha", b"a"), ("beta", b"bb")]);
        let truncated = &nar[..nar.len() - 20];

        let mut reader = NarReader::new(Cursor::new(truncated));
        let mut seen = 0;
        let err = loop {
            match reader.next_entry() {
                Ok(Some(_)) => seen += 1,
                Ok(None) => panic!("truncated archive must not parse cleanly"),
                Err(e) => break e,
            }
        };
        assert!(seen >= 2, "expected entries before the error, got {seen}");
        assert!(matches!(err, crate::Error::NarParse(_) | crate::Error::Io(_)));
    }

    #[test]
    fn test_rejects_nonzero_padding() {
        let mut nar = file_nar(b"abc");
        // Contents "abc" are followed by five padding bytes at the tail of
        // the contents string; corrupt one of them.
        let closing_len = 16; // ")" token
        let pad_offset = nar.len() - closing_len - 1;
        nar[pad_offset] = 0xff;
        assert!(collect(&nar).is_err());
    }

    #[test]
    fn test_rejects_unordered_entries() {
        assert!(collect(&dir_nar(&[("beta", b"b"), ("alpha", b"a")])).is_err());
    }

    #[test]
    fn test_rejects_duplicate_entries() {
        assert!(collect(&dir_nar(&[("same", b"a"), ("same", b"b")])).is_err());
    }

    #[test]
    fn test_rejects_trailing_data() {
        let mut nar = file_nar(b"x");
        nar.extend_from_slice(b"junk");
        assert!(collect(&nar).is_err());
    }

    #[test]
    fn test_empty_input_fails() {
        assert!(collect(&[]).is_err());
    }
}
