use anyhow::{Result, anyhow, bail};

/// 规范化串口名称
///
/// macOS 上 `/dev/tty.*` 会等待 DCD，改用对应的 `/dev/cu.*`；
/// Windows 上 COM 口名称统一为大写
pub fn normalize_port_name(port_name: &str) -> String {
    let port_name = port_name.trim();

    #[cfg(target_os = "macos")]
    if let Some(rest) = port_name.strip_prefix("/dev/tty.") {
        return format!("/dev/cu.{}", rest);
    }

    #[cfg(windows)]
    if port_name.len() > 3 && port_name[..3].eq_ignore_ascii_case("com") {
        return port_name.to_ascii_uppercase();
    }

    port_name.to_string()
}

/// 检查串口是否存在，不存在时列出可用串口
pub fn check_port_available(port_name: &str) -> Result<()> {
    let ports = serialport::available_ports()
        .map_err(|e| anyhow!("Failed to get available ports list: {}", e))?;

    let candidates: Vec<String> = ports
        .into_iter()
        .map(|p| p.port_name)
        .filter(|name| !cfg!(target_os = "macos") || !name.starts_with("/dev/tty."))
        .collect();

    if candidates.iter().any(|name| name == port_name) {
        return Ok(());
    }

    bail!(
        "The specified port '{}' does not exist. Available ports: {}",
        port_name,
        if candidates.is_empty() {
            "No available ports".to_string()
        } else {
            candidates.join(", ")
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_port_name() {
        assert_eq!(normalize_port_name(" /dev/ttyUSB0 "), "/dev/ttyUSB0");
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn prefers_callout_device() {
        assert_eq!(
            normalize_port_name("/dev/tty.usbserial-1410"),
            "/dev/cu.usbserial-1410"
        );
    }
}
