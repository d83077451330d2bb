//! `adb` / `emulator` command builders and output parsers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::command::CommandSpec;

pub const DEFAULT_ADB_PATH: &str = "adb";
pub const DEFAULT_EMULATOR_PATH: &str = "emulator";

/// Builds every process invocation the bridge is allowed to make.
#[derive(Debug, Clone)]
pub struct AdbCommands {
    adb: String,
    emulator: String,
}

impl Default for AdbCommands {
    fn default() -> Self {
        Self::new(DEFAULT_ADB_PATH, DEFAULT_EMULATOR_PATH)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorOptions {
    pub no_window: bool,
    pub no_audio: bool,
    pub no_boot_anim: bool,
    pub gpu: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RawCommandError {
    #[error("Command is empty")]
    Empty,

    #[error("Only ADB commands allowed")]
    NotAdb,

    #[error("Could not parse command: {0}")]
    Parse(String),
}

impl AdbCommands {
    pub fn new(adb: impl Into<String>, emulator: impl Into<String>) -> Self {
        Self {
            adb: adb.into(),
            emulator: emulator.into(),
        }
    }

    pub fn adb_path(&self) -> &str {
        &self.adb
    }

    pub fn emulator_path(&self) -> &str {
        &self.emulator
    }

    fn adb_on(&self, device: &str) -> CommandSpec {
        CommandSpec::new(&self.adb).args(["-s", device])
    }

    /// `adb devices -l`
    pub fn devices(&self) -> CommandSpec {
        CommandSpec::new(&self.adb).args(["devices", "-l"])
    }

    /// `adb devices`, used to find running emulators.
    pub fn device_list(&self) -> CommandSpec {
        CommandSpec::new(&self.adb).arg("devices")
    }

    /// `emulator -list-avds`
    pub fn list_avds(&self) -> CommandSpec {
        CommandSpec::new(&self.emulator).arg("-list-avds")
    }

    /// `adb -s <serial> emu avd name`
    pub fn avd_name(&self, serial: &str) -> CommandSpec {
        self.adb_on(serial).args(["emu", "avd", "name"])
    }

    /// `adb -s <device> shell pm list packages [<filter>]`
    pub fn list_packages(&self, device: &str, filter: Option<&str>) -> CommandSpec {
        let spec = self.adb_on(device).args(["shell", "pm", "list", "packages"]);
        match filter {
            Some(filter) if !filter.is_empty() => spec.arg(filter),
            _ => spec,
        }
    }

    /// `adb -s <device> install -r <apk_path>`
    pub fn install(&self, device: &str, apk_path: &str) -> CommandSpec {
        self.install_apk(Some(device), apk_path)
    }

    /// `adb [-s <device>] install -r <apk_path>`; without a device adb picks the only one attached.
    pub fn install_apk(&self, device: Option<&str>, apk_path: &str) -> CommandSpec {
        let spec = match device {
            Some(device) => self.adb_on(device),
            None => CommandSpec::new(&self.adb),
        };
        spec.args(["install", "-r", apk_path])
    }

    /// `emulator -avd <name> [-no-window] [-no-audio] [-no-boot-anim] [-gpu <mode>]`
    pub fn start_emulator(&self, avd_name: &str, options: &EmulatorOptions) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.emulator).args(["-avd", avd_name]);
        if options.no_window {
            spec = spec.arg("-no-window");
        }
        if options.no_audio {
            spec = spec.arg("-no-audio");
        }
        if options.no_boot_anim {
            spec = spec.arg("-no-boot-anim");
        }
        if let Some(gpu) = options.gpu.as_deref().filter(|g| !g.is_empty()) {
            spec = spec.args(["-gpu", gpu]);
        }
        spec
    }

    /// `adb -s <device> emu kill`
    pub fn stop_emulator(&self, device: &str) -> CommandSpec {
        self.adb_on(device).args(["emu", "kill"])
    }

    /// Tokenize a free-form command line and accept it only when the first
    /// token is literally `adb`. The remaining tokens become argv.
    pub fn raw(&self, command: &str) -> Result<CommandSpec, RawCommandError> {
        let tokens =
            shell_words::split(command).map_err(|e| RawCommandError::Parse(e.to_string()))?;
        let mut tokens = tokens.into_iter();
        match tokens.next() {
            None => Err(RawCommandError::Empty),
            Some(first) if first == "adb" => Ok(CommandSpec::new(&self.adb).args(tokens)),
            Some(_) => Err(RawCommandError::NotAdb),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub serial: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

/// Parse `adb devices [-l]` output.
pub fn parse_devices(output: &str) -> Vec<DeviceEntry> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?.to_string();
            let state = parts.next()?.to_string();
            let details = parts
                .filter_map(|kv| kv.split_once(':'))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            Some(DeviceEntry {
                serial,
                state,
                details,
            })
        })
        .collect()
}

/// Parse `emulator -list-avds` output. The emulator sometimes prints
/// diagnostic lines (`INFO    | ...`) ahead of the names.
pub fn parse_avd_names(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.contains('|') && !line.starts_with("INFO"))
        .map(str::to_string)
        .collect()
}

/// Console port of an emulator serial such as `emulator-5554`.
pub fn emulator_port(serial: &str) -> Option<u16> {
    serial.strip_prefix("emulator-")?.parse().ok()
}

/// The console answers `emu avd name` with the name followed by `OK`.
pub fn parse_avd_name_reply(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && *line != "OK")
        .map(str::to_string)
}

/// Parse `pm list packages` output into bare package names.
pub fn parse_packages(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("package:"))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// `adb install` reports some failures on stdout with a zero exit status.
pub fn install_failed(stdout: &str, stderr: &str) -> bool {
    stdout.contains("Failure [") || stderr.contains("Failure [")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvdDescriptor {
    pub name: String,
    pub running: bool,
    pub port: Option<u16>,
}

/// Combine the AVD enumeration with the running emulators, keyed by AVD name.
pub fn cross_reference(names: &[String], running: &HashMap<String, u16>) -> Vec<AvdDescriptor> {
    names
        .iter()
        .map(|name| {
            let port = running.get(name).copied();
            AvdDescriptor {
                name: name.clone(),
                running: port.is_some(),
                port,
            }
        })
        .collect()
}
