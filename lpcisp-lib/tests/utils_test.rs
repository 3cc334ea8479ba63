use lpcisp_lib::Error;
use lpcisp_lib::utils::Utils;
use std::io::Write;
use tempfile::{Builder, NamedTempFile};

fn hex_file(content: &str) -> NamedTempFile {
    let mut file = Builder::new().suffix(".hex").tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_hex_single_segment_with_gap() {
    let hex = hex_file(":0400000001020304F2\n:0410000005060708D2\n:00000001FF\n");

    let result = Utils::load_image(hex.path(), None).unwrap();
    assert_eq!(result.len(), 1);

    let segment = &result[0];
    assert_eq!(segment.address, 0x0000_0000);
    assert_eq!(segment.data.len(), 0x1004);
    assert_eq!(&segment.data[0..4], &[0x01, 0x02, 0x03, 0x04]);
    assert!(segment.data[4..0x1000].iter().all(|&b| b == 0xFF));
    assert_eq!(&segment.data[0x1000..0x1004], &[0x05, 0x06, 0x07, 0x08]);
}

#[test]
fn test_hex_multiple_segments() {
    let hex = hex_file(":0400000001020304F2\n:020000040001F9\n:0400000011121314B2\n:00000001FF\n");

    let result = Utils::hex_to_write_flash_files(hex.path()).unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result[0].address, 0x0000_0000);
    assert_eq!(result[0].data, vec![0x01, 0x02, 0x03, 0x04]);
    assert_eq!(result[1].address, 0x0001_0000);
    assert_eq!(result[1].data, vec![0x11, 0x12, 0x13, 0x14]);
}

#[test]
fn test_hex_complex_multi_segment() {
    let hex = hex_file(concat!(
        ":100000000102030405060708090A0B0C0D0E0F1068\n",
        ":08100000111213141516171844\n",
        ":020000040001F9\n",
        ":040000002122232472\n",
        ":041000003132333422\n",
        ":020000040010EA\n",
        ":080000004142434445464748D4\n",
        ":00000001FF\n",
    ));

    let result = Utils::hex_to_write_flash_files(hex.path()).unwrap();
    assert_eq!(result.len(), 3);
    assert_eq!(result[0].address, 0x0000_0000);
    assert_eq!(result[0].data.len(), 0x1008);
    assert_eq!(result[1].address, 0x0001_0000);
    assert_eq!(result[1].data.len(), 0x1004);
    assert_eq!(result[2].address, 0x0010_0000);
    assert_eq!(
        result[2].data,
        vec![0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48]
    );
}

#[test]
fn test_hex_continuous_records_merge() {
    let segments =
        Utils::parse_hex(":020000040800F2\n:0400000001020304F2\n:0400040005060708DE\n:00000001FF\n")
            .unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].address, 0x0800_0000);
    assert_eq!(
        segments[0].data,
        vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]
    );
}

#[test]
fn test_hex_bad_checksum_is_rejected() {
    assert!(matches!(
        Utils::parse_hex(":0400000001020304F3\n:00000001FF\n"),
        Err(Error::IntelHex(_))
    ));
}

#[test]
fn test_binary_image_needs_address() {
    let mut bin = Builder::new().suffix(".bin").tempfile().unwrap();
    bin.write_all(&[1, 2, 3, 4]).unwrap();

    assert!(matches!(
        Utils::load_image(bin.path(), None),
        Err(Error::InvalidInput(_))
    ));

    let result = Utils::load_image(bin.path(), Some(0x1000)).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].address, 0x1000);
    assert_eq!(result[0].data, vec![1, 2, 3, 4]);
}

#[test]
fn test_str_to_u32() {
    assert_eq!(Utils::str_to_u32("123").unwrap(), 123);
    assert_eq!(Utils::str_to_u32("0x10").unwrap(), 16);
    assert_eq!(Utils::str_to_u32("0b1010").unwrap(), 10);
    assert_eq!(Utils::str_to_u32("0o17").unwrap(), 15);
    assert_eq!(Utils::str_to_u32("4k").unwrap(), 4096);
    assert_eq!(Utils::str_to_u32("1M").unwrap(), 1024 * 1024);
}

#[test]
fn test_parse_read_file_info() {
    let result = Utils::parse_read_file_info("output.bin@0x1000:0x100").unwrap();
    assert_eq!(result.file_path, "output.bin");
    assert_eq!(result.address, 0x1000);
    assert_eq!(result.size, 0x100);

    let result = Utils::parse_read_file_info("data.bin@0x10000000:1k").unwrap();
    assert_eq!(result.address, 0x1000_0000);
    assert_eq!(result.size, 1024);

    assert!(Utils::parse_read_file_info("invalid_format").is_err());
    assert!(Utils::parse_read_file_info("file@0x1000").is_err());
    assert!(Utils::parse_read_file_info("file@invalid:0x100").is_err());
}
