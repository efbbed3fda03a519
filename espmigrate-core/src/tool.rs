//! Invocation of the delegated Espressif tools.
//!
//! Every interaction with a board or with the encryption key goes through one
//! of three command-line tools: `esptool` (flash read/write), `espefuse`
//! (efuse summary) and `espsecure` (flash data encryption). This module builds
//! their command lines from the [`Config`] and runs them through a
//! [`ToolInvoker`], which can be replaced by a fake in tests.
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::Config;
use crate::error::{Error, Result};

/// One of the delegated tools.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tool {
    Esptool,
    Espefuse,
    Espsecure,
}

impl Tool {
    pub fn name(self) -> &'static str {
        match self {
            Tool::Esptool => "esptool",
            Tool::Espefuse => "espefuse",
            Tool::Espsecure => "espsecure",
        }
    }
}

/// A fully resolved command line for a single tool run.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub tool: Tool,
    pub program: PathBuf,
    /// Arguments placed before the tool arguments, e.g. the script run by
    /// an interpreter.
    pub prefix: Vec<OsString>,
    /// The tool's own arguments.
    pub args: Vec<OsString>,
}

impl Invocation {
    /// Every argument passed to `program`, in order.
    pub fn all_args(&self) -> impl Iterator<Item = &OsString> {
        self.prefix.iter().chain(&self.args)
    }

    /// The command line as a single printable string.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.all_args().map(OsString::as_os_str))
            .map(|s| s.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Exit status and captured text of a finished tool run.
#[derive(Clone, Debug, Default)]
pub struct ToolOutput {
    /// Exit code, `-1` when the process was terminated by a signal.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs a tool to completion and reports how it went.
///
/// Implementations block until the tool exits. An `Err` means the tool could
/// not be started at all; a tool that ran and failed is an `Ok` with a
/// non-zero [`ToolOutput::status`].
pub trait ToolInvoker {
    fn invoke(&self, invocation: &Invocation) -> std::io::Result<ToolOutput>;
}

/// Runs tools as child processes, capturing their output.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessInvoker;

impl ToolInvoker for ProcessInvoker {
    fn invoke(&self, invocation: &Invocation) -> std::io::Result<ToolOutput> {
        let output = Command::new(&invocation.program)
            .args(invocation.all_args())
            .output()?;

        Ok(ToolOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Formats a flash address the way staged file names and tool arguments
/// expect it: lowercase hex with a `0x` prefix.
pub fn hex(value: u32) -> String {
    format!("{value:#x}")
}

/// The three delegated tools bound to a configuration and an invoker.
pub struct Toolchain<'a> {
    config: &'a Config,
    invoker: &'a dyn ToolInvoker,
}

impl<'a> Toolchain<'a> {
    pub fn new(config: &'a Config, invoker: &'a dyn ToolInvoker) -> Self {
        Self { config, invoker }
    }

    pub fn config(&self) -> &'a Config {
        self.config
    }

    /// Builds the command line for `tool` with the given tool arguments.
    pub fn invocation<I, S>(&self, tool: Tool, tool_args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let script = match tool {
            Tool::Esptool => &self.config.esptool,
            Tool::Espefuse => &self.config.espefuse,
            Tool::Espsecure => &self.config.espsecure,
        };

        let (program, prefix) = match &self.config.python {
            Some(python) => (python.clone(), vec![script.clone().into_os_string()]),
            None => (script.clone(), Vec::new()),
        };

        Invocation {
            tool,
            program,
            prefix,
            args: tool_args.into_iter().map(Into::into).collect(),
        }
    }

    fn serial_args(&self, with_baud: bool) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--port".into(), self.config.port.clone().into()];
        if with_baud {
            args.push("--baud".into());
            args.push(self.config.baud.to_string().into());
            args.push("--chip".into());
            args.push(self.config.chip.clone().into());
            args.push("--after".into());
            args.push("no_reset".into());
        }
        args
    }

    /// `esptool ... read_flash <offset> <len> <path>`
    pub fn read_flash(&self, offset: u32, len: u32, path: &Path) -> Result<()> {
        let mut args = self.serial_args(true);
        args.extend([
            "read_flash".into(),
            hex(offset).into(),
            hex(len).into(),
            path.as_os_str().to_owned(),
        ]);
        self.run(self.invocation(Tool::Esptool, args), path)?;
        Ok(())
    }

    /// `esptool ... write_flash <offset> <path>`
    pub fn write_flash(&self, offset: u32, path: &Path) -> Result<()> {
        let mut args = self.serial_args(true);
        args.extend([
            "write_flash".into(),
            hex(offset).into(),
            path.as_os_str().to_owned(),
        ]);
        self.run(self.invocation(Tool::Esptool, args), path)?;
        Ok(())
    }

    /// `espsecure encrypt_flash_data --keyfile <key> --address <offset> -o <output> <input>`
    ///
    /// ESP32 flash encryption is tweaked by the flash address, so `offset`
    /// must be the address the data will be written to.
    pub fn encrypt_flash_data(&self, offset: u32, input: &Path, output: &Path) -> Result<()> {
        let args: Vec<OsString> = vec![
            "encrypt_flash_data".into(),
            "--keyfile".into(),
            self.config.key_file.clone().into_os_string(),
            "--address".into(),
            hex(offset).into(),
            "-o".into(),
            output.as_os_str().to_owned(),
            input.as_os_str().to_owned(),
        ];
        self.run(self.invocation(Tool::Espsecure, args), output)?;
        Ok(())
    }

    /// `espefuse --port <port> summary`, returning the captured report.
    pub fn efuse_summary(&self) -> Result<String> {
        let mut args = self.serial_args(false);
        args.push("summary".into());
        let invocation = self.invocation(Tool::Espefuse, args);
        let output = self.run(invocation, Path::new(&self.config.port))?;
        Ok(output.stdout)
    }

    fn run(&self, invocation: Invocation, artifact: &Path) -> Result<ToolOutput> {
        let tool = invocation.tool.name();
        log::debug!("running {}", invocation.command_line());

        let output = self
            .invoker
            .invoke(&invocation)
            .map_err(|source| Error::ToolLaunch { tool, source })?;

        if !output.stdout.is_empty() {
            log::trace!("{tool} stdout:\n{}", output.stdout);
        }

        if !output.success() {
            // esptool reports "A fatal error occurred" on stdout.
            if let Some(tail) = tail(&output.stdout, FAILURE_CONTEXT_LINES) {
                log::error!("{tool} stdout:\n{tail}");
            }
            if !output.stderr.is_empty() {
                log::error!("{tool} stderr:\n{}", output.stderr.trim_end());
            }
            return Err(Error::ToolFailed {
                tool,
                artifact: artifact_name(artifact),
                status: output.status,
            });
        }
        Ok(output)
    }
}

/// Lines of a failing tool's stdout that are logged as errors.
const FAILURE_CONTEXT_LINES: usize = 5;

/// The last `lines` non-blank lines of `text`, if there are any.
fn tail(text: &str, lines: usize) -> Option<String> {
    let mut kept: Vec<&str> = text
        .lines()
        .rev()
        .filter(|l| !l.trim().is_empty())
        .take(lines)
        .collect();
    if kept.is_empty() {
        return None;
    }
    kept.reverse();
    Some(kept.join("\n"))
}

fn artifact_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Recorder {
        calls: RefCell<Vec<Invocation>>,
        status: i32,
    }

    impl ToolInvoker for Recorder {
        fn invoke(&self, invocation: &Invocation) -> std::io::Result<ToolOutput> {
            self.calls.borrow_mut().push(invocation.clone());
            Ok(ToolOutput {
                status: self.status,
                stdout: "FLASH_CRYPT_CNT = 0 R/W".into(),
                stderr: String::new(),
            })
        }
    }

    fn recorder(status: i32) -> Recorder {
        Recorder {
            calls: RefCell::new(Vec::new()),
            status,
        }
    }

    fn args(invocation: &Invocation) -> Vec<String> {
        invocation
            .args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn read_flash_follows_esptool_argument_order() {
        let config = Config::default();
        let invoker = recorder(0);
        let tools = Toolchain::new(&config, &invoker);

        tools
            .read_flash(0x10000, 0x100000, Path::new("./0x10000_app.bin"))
            .unwrap();

        let calls = invoker.calls.borrow();
        assert_eq!(calls[0].program, PathBuf::from("esptool.py"));
        assert_eq!(
            args(&calls[0]),
            [
                "--port", "/dev/ttyUSB0", "--baud", "921600", "--chip", "esp32", "--after",
                "no_reset", "read_flash", "0x10000", "0x100000", "./0x10000_app.bin",
            ]
        );
    }

    #[test]
    fn encrypt_passes_address_and_output_before_input() {
        let config = Config::default();
        let invoker = recorder(0);
        let tools = Toolchain::new(&config, &invoker);

        tools
            .encrypt_flash_data(0x8000, Path::new("pt.bin"), Path::new("pt.bin.CRYPT"))
            .unwrap();

        let calls = invoker.calls.borrow();
        assert_eq!(calls[0].tool, Tool::Espsecure);
        assert_eq!(
            args(&calls[0]),
            [
                "encrypt_flash_data", "--keyfile", "mykey.bin", "--address", "0x8000", "-o",
                "pt.bin.CRYPT", "pt.bin",
            ]
        );
    }

    #[test]
    fn python_interpreter_is_prepended() {
        let config = Config {
            python: Some(PathBuf::from("/usr/bin/python")),
            ..Config::default()
        };
        let invoker = recorder(0);
        let tools = Toolchain::new(&config, &invoker);

        let summary = tools.efuse_summary().unwrap();

        assert_eq!(summary, "FLASH_CRYPT_CNT = 0 R/W");
        let calls = invoker.calls.borrow();
        assert_eq!(calls[0].program, PathBuf::from("/usr/bin/python"));
        assert_eq!(calls[0].prefix, [OsString::from("espefuse.py")]);
        assert_eq!(args(&calls[0]), ["--port", "/dev/ttyUSB0", "summary"]);
        assert_eq!(
            calls[0].command_line(),
            "/usr/bin/python espefuse.py --port /dev/ttyUSB0 summary"
        );
    }

    #[test]
    fn non_zero_status_names_the_artifact() {
        let config = Config::default();
        let invoker = recorder(2);
        let tools = Toolchain::new(&config, &invoker);

        let err = tools
            .write_flash(0x1000, Path::new("staging/0x1000_bootloader.bin.CRYPT"))
            .unwrap_err();

        match err {
            Error::ToolFailed {
                tool,
                artifact,
                status,
            } => {
                assert_eq!(tool, "esptool");
                assert_eq!(artifact, "0x1000_bootloader.bin.CRYPT");
                assert_eq!(status, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn failure_context_keeps_the_last_lines() {
        let stdout = "esptool.py v4.7.0\nConnecting....\n\nA fatal error occurred: \
                      Failed to connect to ESP32\n\n";

        assert_eq!(
            tail(stdout, 2).as_deref(),
            Some("Connecting....\nA fatal error occurred: Failed to connect to ESP32")
        );
        assert_eq!(tail(stdout, 10).unwrap().lines().count(), 3);
        assert_eq!(tail("\n  \n", 5), None);
    }

    #[test]
    fn hex_is_lowercase_with_prefix() {
        assert_eq!(hex(0x10000), "0x10000");
        assert_eq!(hex(0xABCDE), "0xabcde");
        assert_eq!(hex(0), "0x0");
    }
}
