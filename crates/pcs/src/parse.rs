//! Text trace dump parsing.
//!
//! One record per line:
//!
//! ```text
//! # comment
//! fcall  cpu=0 tag=0x1f state=start ts=100 tid=7 pc=0xffffffff80001000 depth=0
//! access cpu=0 addr=0xffff880000001000 ts=101 write
//! ```
//!
//! Numbers are decimal or `0x`-prefixed hex. Dumps ending in `.zst` are
//! decompressed on the fly.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::{Error, FcallEntry, FcallState, Result};

/// A memory access observed on a CPU, attributed to whatever call stack runs there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Access {
    pub cpu: usize,
    pub addr: u64,
    pub ts: u64,
    pub write: bool,
}

/// One parsed trace record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Record {
    Fcall(FcallEntry),
    Access(Access),
}

impl Record {
    /// CPU the record happened on.
    #[must_use]
    pub const fn cpu(&self) -> usize {
        match self {
            Self::Fcall(entry) => entry.cpu,
            Self::Access(access) => access.cpu,
        }
    }
}

static RECORD_PATTERN: OnceLock<Regex> = OnceLock::new();
static FIELD_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Parse one line. Blank lines and comments yield `Ok(None)`.
///
/// # Errors
///
/// Returns a message naming the problem if the record kind is unknown or a
/// field is missing, duplicated, unknown or malformed.
pub fn parse_line(line: &str) -> std::result::Result<Option<Record>, String> {
    let line = line.split('#').next().unwrap_or_default().trim();
    if line.is_empty() {
        return Ok(None);
    }

    let record_pattern = RECORD_PATTERN
        .get_or_init(|| Regex::new(r"^([a-z]+)(?:\s+(.*))?$").expect("valid record pattern"));
    let caps = record_pattern
        .captures(line)
        .ok_or_else(|| format!("malformed record '{line}'"))?;
    let fields = Fields::parse(caps.get(2).map_or("", |m| m.as_str()))?;

    let record = match &caps[1] {
        "fcall" => Record::Fcall(parse_fcall(&fields)?),
        "access" => Record::Access(parse_access(&fields)?),
        other => return Err(format!("unknown record kind '{other}'")),
    };
    Ok(Some(record))
}

fn parse_fcall(fields: &Fields<'_>) -> std::result::Result<FcallEntry, String> {
    fields.expect_only(&["cpu", "tag", "state", "ts", "tid", "pc", "depth"], &[])?;

    let state = fields.required("state")?.parse::<FcallState>()?;
    let depth = fields.number_or("depth", 0)?;
    let entry = FcallEntry::new(fields.cpu()?, fields.number("tag")?, state)
        .with_ts(fields.number_or("ts", 0)?)
        .with_tid(fields.number_or("tid", 0)?)
        .with_pc(fields.number_or("pc", 0)?)
        .with_depth(u16::try_from(depth).map_err(|_| format!("depth {depth} out of range"))?);
    Ok(entry)
}

fn parse_access(fields: &Fields<'_>) -> std::result::Result<Access, String> {
    fields.expect_only(&["cpu", "addr", "ts"], &["write"])?;

    Ok(Access {
        cpu: fields.cpu()?,
        addr: fields.number("addr")?,
        ts: fields.number_or("ts", 0)?,
        write: fields.flag("write"),
    })
}

/// Parse a decimal or `0x`-prefixed hex number.
fn parse_number(text: &str) -> Option<u64> {
    text.strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .map_or_else(|| text.parse().ok(), |hex| u64::from_str_radix(hex, 16).ok())
}

/// `key=value` pairs and bare flags of one record.
struct Fields<'a> {
    values: Vec<(&'a str, &'a str)>,
    flags: Vec<&'a str>,
}

impl<'a> Fields<'a> {
    fn parse(text: &'a str) -> std::result::Result<Self, String> {
        let field_pattern = FIELD_PATTERN
            .get_or_init(|| Regex::new(r"^([a-z_]+)(?:=(\S+))?$").expect("valid field pattern"));

        let mut fields = Self {
            values: Vec::new(),
            flags: Vec::new(),
        };
        for token in text.split_whitespace() {
            let caps = field_pattern
                .captures(token)
                .ok_or_else(|| format!("malformed field '{token}'"))?;
            let key = caps.get(1).map_or("", |m| m.as_str());
            if fields.values.iter().any(|(k, _)| *k == key) || fields.flags.contains(&key) {
                return Err(format!("duplicate field '{key}'"));
            }
            match caps.get(2) {
                Some(value) => fields.values.push((key, value.as_str())),
                None => fields.flags.push(key),
            }
        }
        Ok(fields)
    }

    fn expect_only(&self, keys: &[&str], flags: &[&str]) -> std::result::Result<(), String> {
        if let Some((key, _)) = self.values.iter().find(|(k, _)| !keys.contains(k)) {
            return Err(format!("unknown field '{key}'"));
        }
        if let Some(flag) = self.flags.iter().find(|f| !flags.contains(f)) {
            return Err(format!("unknown flag '{flag}'"));
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        self.values
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, value)| *value)
    }

    fn required(&self, key: &str) -> std::result::Result<&'a str, String> {
        self.get(key).ok_or_else(|| format!("missing field '{key}'"))
    }

    fn number(&self, key: &str) -> std::result::Result<u64, String> {
        let text = self.required(key)?;
        parse_number(text).ok_or_else(|| format!("invalid {key} '{text}'"))
    }

    fn number_or(&self, key: &str, default: u64) -> std::result::Result<u64, String> {
        if self.get(key).is_some() {
            self.number(key)
        } else {
            Ok(default)
        }
    }

    fn cpu(&self) -> std::result::Result<usize, String> {
        let cpu = self.number("cpu")?;
        usize::try_from(cpu).map_err(|_| format!("cpu {cpu} out of range"))
    }

    fn flag(&self, name: &str) -> bool {
        self.flags.contains(&name)
    }
}

/// Iterator over the records of a trace dump, paired with their 1-based line numbers.
pub struct TraceReader {
    reader: Box<dyn BufRead>,
    line: usize,
    buf: String,
}

impl TraceReader {
    /// Open a dump file, decompressing `*.zst` files.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the zstd stream
    /// header is invalid.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let is_zstd = path.extension().is_some_and(|ext| ext == "zst");
        if is_zstd {
            let decoder = zstd::stream::Decoder::new(file)?;
            Ok(Self::new(BufReader::new(decoder)))
        } else {
            Ok(Self::new(BufReader::new(file)))
        }
    }

    /// Read records from an already opened source.
    #[must_use]
    pub fn from_reader(reader: impl Read + 'static) -> Self {
        Self::new(BufReader::new(reader))
    }

    fn new(reader: impl BufRead + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            line: 0,
            buf: String::new(),
        }
    }
}

impl Iterator for TraceReader {
    type Item = Result<(usize, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(Error::Io(e))),
            }
            self.line += 1;

            match parse_line(&self.buf) {
                Ok(Some(record)) => return Some(Ok((self.line, record))),
                Ok(None) => {}
                Err(message) => {
                    return Some(Err(Error::Parse {
                        line: self.line,
                        message,
                    }));
                }
            }
        }
    }
}
