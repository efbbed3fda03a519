//! A fake set of Espressif tools backed by an in-memory flash image.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use espmigrate_core::config::Config;
use espmigrate_core::tool::{Invocation, Tool, ToolInvoker, ToolOutput};

pub const FLASH_SIZE: usize = 0x20000;
pub const KEY: u8 = 0x5A;

/// One partition table entry: type, subtype, offset, size, name.
pub type Entry = (u8, u8, u32, u32, &'static str);

pub const NVS: Entry = (0x01, 0x02, 0x9000, 0x6000, "nvs");
pub const APP: Entry = (0x00, 0x00, 0x10000, 0x1000, "app");

pub fn record(entry: Entry) -> [u8; 32] {
    let (ty, subtype, offset, size, name) = entry;
    let mut raw = [0u8; 32];
    raw[0] = 0xAA;
    raw[1] = 0x50;
    raw[2] = ty;
    raw[3] = subtype;
    raw[4..8].copy_from_slice(&offset.to_le_bytes());
    raw[8..12].copy_from_slice(&size.to_le_bytes());
    raw[12..12 + name.len()].copy_from_slice(name.as_bytes());
    raw
}

/// A flash image with a recognisable byte pattern and the given table at
/// 0x8000.
pub fn source_flash(entries: &[Entry]) -> Vec<u8> {
    let mut flash: Vec<u8> = (0..FLASH_SIZE).map(|i| (i % 251) as u8).collect();
    flash[0x8000..0x8C00].fill(0xFF);
    for (i, entry) in entries.iter().enumerate() {
        let at = 0x8000 + i * 32;
        flash[at..at + 32].copy_from_slice(&record(*entry));
    }
    flash
}

/// What the fake espsecure produces for `plain`.
pub fn encrypted(plain: &[u8]) -> Vec<u8> {
    plain.iter().map(|b| b ^ KEY).collect()
}

pub fn config_for(staging: &Path) -> Config {
    Config {
        staging_dir: staging.to_path_buf(),
        key_file: staging.join("mykey.bin"),
        ..Config::default()
    }
}

pub fn staged_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .filter(|n| n.starts_with("0x"))
        .collect();
    names.sort();
    names
}

pub struct FakeTools {
    pub flash: Vec<u8>,
    /// Counter values returned by successive efuse probes; `None` prints a
    /// summary without the counter line. Exhausted queues report `None`.
    pub counters: RefCell<VecDeque<Option<u32>>>,
    /// Replaces the bytes read from the given offset.
    pub read_overrides: HashMap<u32, Vec<u8>>,
    /// Offset whose read fails.
    pub fail_read_at: Option<u32>,
    /// Flash address whose encryption fails.
    pub fail_encrypt_at: Option<u32>,
    /// 1-based index of the write_flash call that fails.
    pub fail_write_call: Option<usize>,
    pub writes: RefCell<Vec<(u32, String, Vec<u8>)>>,
    pub calls: RefCell<Vec<Invocation>>,
}

impl FakeTools {
    pub fn new(flash: Vec<u8>) -> Self {
        Self {
            flash,
            counters: RefCell::new(VecDeque::new()),
            read_overrides: HashMap::new(),
            fail_read_at: None,
            fail_encrypt_at: None,
            fail_write_call: None,
            writes: RefCell::new(Vec::new()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn with_counters(self, counters: &[Option<u32>]) -> Self {
        *self.counters.borrow_mut() = counters.iter().copied().collect();
        self
    }

    pub fn calls_to(&self, tool: Tool) -> Vec<Vec<String>> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.tool == tool)
            .map(args_of)
            .collect()
    }

    fn efuse_summary(&self) -> ToolOutput {
        let mut stdout = String::from("espefuse.py v4.7.0\nSecurity fuses:\n");
        if let Some(Some(v)) = self.counters.borrow_mut().pop_front() {
            stdout.push_str(&format!(
                "FLASH_CRYPT_CNT (BLOCK0)   Flash encryption mode counter   = {v} R/W (0x{v:02x})\n"
            ));
        }
        ok(stdout)
    }

    fn esptool(&self, args: &[String]) -> io::Result<ToolOutput> {
        if let Some(i) = args.iter().position(|a| a == "read_flash") {
            let offset = parse_hex(&args[i + 1]);
            let len = parse_hex(&args[i + 2]) as usize;
            if self.fail_read_at == Some(offset) {
                return Ok(failed(1, "A fatal error occurred: Failed to read flash"));
            }
            let data = match self.read_overrides.get(&offset) {
                Some(data) => data.clone(),
                None => self.flash[offset as usize..offset as usize + len].to_vec(),
            };
            fs::write(&args[i + 3], data)?;
            return Ok(ok(String::new()));
        }

        if let Some(i) = args.iter().position(|a| a == "write_flash") {
            let call = self.writes.borrow().len() + 1;
            if self.fail_write_call == Some(call) {
                return Ok(failed(2, "A fatal error occurred: Serial data stream stopped"));
            }
            let path = PathBuf::from(&args[i + 2]);
            let data = fs::read(&path)?;
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            self.writes
                .borrow_mut()
                .push((parse_hex(&args[i + 1]), name, data));
            return Ok(ok(String::new()));
        }

        Ok(failed(2, "unsupported esptool command"))
    }

    fn espsecure(&self, args: &[String]) -> io::Result<ToolOutput> {
        if self.fail_encrypt_at == Some(parse_hex(value_after(args, "--address"))) {
            return Ok(failed(1, "A fatal error occurred: Key file has wrong length"));
        }
        let output = value_after(args, "-o");
        let input = args.last().unwrap();
        let plain = fs::read(input)?;
        fs::write(output, encrypted(&plain))?;
        Ok(ok(String::new()))
    }
}

impl ToolInvoker for FakeTools {
    fn invoke(&self, invocation: &Invocation) -> io::Result<ToolOutput> {
        self.calls.borrow_mut().push(invocation.clone());
        let args = args_of(invocation);
        match invocation.tool {
            Tool::Espefuse => Ok(self.efuse_summary()),
            Tool::Esptool => self.esptool(&args),
            Tool::Espsecure => self.espsecure(&args),
        }
    }
}

pub fn args_of(invocation: &Invocation) -> Vec<String> {
    invocation
        .args
        .iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect()
}

pub fn value_after<'a>(args: &'a [String], flag: &str) -> &'a str {
    let i = args.iter().position(|a| a == flag).unwrap();
    &args[i + 1]
}

fn parse_hex(s: &str) -> u32 {
    u32::from_str_radix(s.trim_start_matches("0x"), 16).unwrap()
}

fn ok(stdout: String) -> ToolOutput {
    ToolOutput {
        status: 0,
        stdout,
        stderr: String::new(),
    }
}

fn failed(status: i32, stderr: &str) -> ToolOutput {
    ToolOutput {
        status,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}
