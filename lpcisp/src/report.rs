//! 命令结果输出

use lpcisp_lib::{BlankCheck, DeviceInfo, SectorRange};

pub fn format_blank_check(range: &SectorRange, result: &BlankCheck) -> String {
    match result {
        BlankCheck::Blank => format!("Sectors {}: blank", range),
        BlankCheck::BootRemapped { offset, value } => format!(
            "Sectors {}: blank (boot block remapped, 0x{:08X} at offset 0x{:X})",
            range, value, offset
        ),
        BlankCheck::NotBlank {
            sector,
            offset,
            value,
        } => format!(
            "Sectors {}: not blank, sector {} holds 0x{:08X} at offset 0x{:X}",
            range, sector, value, offset
        ),
    }
}

pub fn print_blank_check(results: &[(SectorRange, BlankCheck)]) {
    for (range, result) in results {
        println!("{}", format_blank_check(range, result));
    }
}

pub fn print_device_info(info: &DeviceInfo) {
    println!("Part ID:           0x{:08X}", info.part_id);
    println!("Boot code version: {}", info.boot_code_version);
    println!(
        "UID:               {:08X} {:08X} {:08X} {:08X}",
        info.uid[0], info.uid[1], info.uid[2], info.uid[3]
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_check_lines() {
        let range = SectorRange::new(1, 3).unwrap();
        assert_eq!(
            format_blank_check(&range, &BlankCheck::Blank),
            "Sectors 1..3: blank"
        );
        assert_eq!(
            format_blank_check(
                &range,
                &BlankCheck::NotBlank {
                    sector: 2,
                    offset: 0x1004,
                    value: 0x1234
                }
            ),
            "Sectors 1..3: not blank, sector 2 holds 0x00001234 at offset 0x1004"
        );
    }
}
