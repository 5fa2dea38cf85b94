use std::{env, error::Error, fs, path::PathBuf};

/// Used when neither `WPAN_FW_VERSION` nor `GIT_VERSION` is set.
const UNKNOWN_VERSION: &str = "<unknown version>";
/// pid.codes test VID/PID.
const DEFAULT_VID: u16 = 0x1209;
const DEFAULT_PID: u16 = 0x0001;
const DEFAULT_MANUFACTURER: &str = "cc2531-wpan";

fn hex_var(name: &str, default: u16) -> Result<u16, Box<dyn Error>> {
    println!("cargo:rerun-if-env-changed={name}");
    match env::var(name) {
        Ok(value) => {
            let digits = value.trim_start_matches("0x").trim_start_matches("0X");
            Ok(u16::from_str_radix(digits, 16).map_err(|e| format!("{name}={value}: {e}"))?)
        }
        Err(_) => Ok(default),
    }
}

fn string_var(names: &[&str], default: &str) -> Result<String, Box<dyn Error>> {
    for name in names {
        println!("cargo:rerun-if-env-changed={name}");
    }
    let value = names
        .iter()
        .find_map(|name| env::var(name).ok())
        .unwrap_or_else(|| default.into());
    // String descriptors are rendered as UTF-16 of each byte.
    if !value.is_ascii() || value.len() > 126 {
        return Err(format!("{names:?}: `{value}` must be ASCII and at most 126 chars").into());
    }
    Ok(value)
}

fn bcd(value: &str) -> u16 {
    let n = value.parse::<u16>().unwrap_or(0) % 100;
    ((n / 10) << 4) | (n % 10)
}

fn main() -> Result<(), Box<dyn Error>> {
    let vid = hex_var("WPAN_USB_VID", DEFAULT_VID)?;
    let pid = hex_var("WPAN_USB_PID", DEFAULT_PID)?;
    let manufacturer = string_var(&["WPAN_MANUFACTURER"], DEFAULT_MANUFACTURER)?;
    let version = string_var(&["WPAN_FW_VERSION", "GIT_VERSION"], UNKNOWN_VERSION)?;
    let bcd_device = (bcd(&env::var("CARGO_PKG_VERSION_MAJOR")?) << 8)
        | bcd(&env::var("CARGO_PKG_VERSION_MINOR")?);

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    fs::write(
        out_dir.join("build_config.rs"),
        format!(
            "pub const USB_VID: u16 = {vid:#06x};\n\
             pub const USB_PID: u16 = {pid:#06x};\n\
             pub const BCD_DEVICE: u16 = {bcd_device:#06x};\n\
             pub const MANUFACTURER: &str = {manufacturer:?};\n\
             pub const FW_VERSION: &str = {version:?};\n"
        ),
    )?;
    Ok(())
}
