mod common;

use common::*;
use lpcisp_lib::erase_flash::EraseOps;
use lpcisp_lib::progress::{ProgressHelper, no_op_progress_callback};
use lpcisp_lib::read_flash::FlashReader;
use lpcisp_lib::write_flash::{FlashWriter, WriteOptions};
use lpcisp_lib::{
    BlankCheck, Error, ReadFlashFile, SectorRange, SequencingError, SessionState, WriteFlashFile,
};

fn progress() -> ProgressHelper {
    ProgressHelper::new(no_op_progress_callback(), 0)
}

#[test]
fn write_image_erases_stages_copies_and_verifies() {
    let (mut session, handle) = connected(config());
    let data = pattern(300);
    let mut staged = data.clone();
    staged.resize(512, 0xFF);

    handle
        .command("U 23130", &["0"])
        .command("P 1 1", &["0"])
        .command("E 1 1", &["0"]);
    script_write(&handle, 0x1000_0400, &staged);
    handle
        .command("P 1 1", &["0"])
        .command("C 4096 268436480 512", &["0"])
        .command("M 4096 268436480 512", &["0"]);

    let file = WriteFlashFile {
        address: 0x1000,
        data,
    };
    FlashWriter::write_image(&mut session, &progress(), &[file], &WriteOptions::default()).unwrap();

    assert_eq!(handle.remaining(), 0);
    assert_eq!(session.state(), &SessionState::Idle);
}

#[test]
fn write_image_splits_into_blocks() {
    let (mut session, handle) = connected(config());
    let data = pattern(1024 + 256);

    handle.command("U 23130", &["0"]);
    script_write(&handle, 0x1000_0400, &data[..1024]);
    handle
        .command("P 2 2", &["0"])
        .command("C 8192 268436480 1024", &["0"]);
    script_write(&handle, 0x1000_0400, &data[1024..]);
    handle
        .command("P 2 2", &["0"])
        .command("C 9216 268436480 256", &["0"]);

    let options = WriteOptions {
        erase: false,
        verify: false,
        ..WriteOptions::default()
    };
    let file = WriteFlashFile {
        address: 0x2000,
        data,
    };
    FlashWriter::write_image(&mut session, &progress(), &[file], &options).unwrap();
    assert_eq!(handle.remaining(), 0);
}

#[test]
fn write_image_ending_at_flash_end_stays_in_flash() {
    let (mut session, handle) = connected(config());
    let data = pattern(0x300);

    handle
        .command("U 23130", &["0"])
        .command("P 7 7", &["0"])
        .command("E 7 7", &["0"]);
    script_write(&handle, 0x1000_0400, &data[..512]);
    handle
        .command("P 7 7", &["0"])
        .command("C 32000 268436480 512", &["0"])
        .command("M 32000 268436480 512", &["0"]);
    script_write(&handle, 0x1000_0400, &data[512..]);
    handle
        .command("P 7 7", &["0"])
        .command("C 32512 268436480 256", &["0"])
        .command("M 32512 268436480 256", &["0"]);

    let file = WriteFlashFile {
        address: 0x7D00,
        data,
    };
    FlashWriter::write_image(&mut session, &progress(), &[file], &WriteOptions::default()).unwrap();

    assert_eq!(handle.remaining(), 0);
    assert_eq!(session.state(), &SessionState::Idle);
}

#[test]
fn write_image_padding_stays_in_erased_sectors() {
    let (mut session, handle) = connected(config());
    let data = pattern(0x800);

    handle
        .command("U 23130", &["0"])
        .command("P 1 1", &["0"])
        .command("E 1 1", &["0"]);
    script_write(&handle, 0x1000_0400, &data[..1024]);
    handle
        .command("P 1 1", &["0"])
        .command("C 6144 268436480 1024", &["0"]);
    script_write(&handle, 0x1000_0400, &data[1024..]);
    handle
        .command("P 1 1", &["0"])
        .command("C 7168 268436480 1024", &["0"]);

    let options = WriteOptions {
        block_size: 4096,
        verify: false,
        ..WriteOptions::default()
    };
    let file = WriteFlashFile {
        address: 0x1800,
        data,
    };
    FlashWriter::write_image(&mut session, &progress(), &[file], &options).unwrap();

    assert_eq!(handle.remaining(), 0);
    assert!(!handle.written_text().contains("P 1 2"));
}

#[test]
fn write_image_rejects_bad_images_before_touching_device() {
    let (mut session, handle) = connected(config());
    let options = WriteOptions::default();

    let boot = WriteFlashFile {
        address: 0,
        data: pattern(16),
    };
    let good = WriteFlashFile {
        address: 0x1000,
        data: pattern(16),
    };
    assert!(matches!(
        FlashWriter::write_image(&mut session, &progress(), &[good, boot], &options),
        Err(Error::Sequencing(SequencingError::BootSectorProtected(_)))
    ));

    let misaligned = WriteFlashFile {
        address: 0x1004,
        data: pattern(16),
    };
    assert!(matches!(
        FlashWriter::write_image(&mut session, &progress(), &[misaligned], &options),
        Err(Error::InvalidInput(_))
    ));

    let too_large = WriteFlashFile {
        address: 0x7000,
        data: pattern(0x2000),
    };
    assert!(matches!(
        FlashWriter::write_image(&mut session, &progress(), &[too_large], &options),
        Err(Error::Sequencing(SequencingError::AddressOutOfRange { .. }))
    ));

    assert_eq!(handle.written_len(), 0);
}

#[test]
fn verify_failure_surfaces_compare_mismatch() {
    let (mut session, handle) = connected(config());
    let data = pattern(256);

    handle.command("U 23130", &["0"]);
    script_write(&handle, 0x1000_0400, &data);
    handle
        .command("P 1 1", &["0"])
        .command("C 4096 268436480 256", &["0"])
        .command("M 4096 268436480 256", &["10", "0"])
        .command("R 4096 4", &["19"]);

    let options = WriteOptions {
        erase: false,
        ..WriteOptions::default()
    };
    let file = WriteFlashFile {
        address: 0x1000,
        data,
    };
    assert!(matches!(
        FlashWriter::write_image(&mut session, &progress(), &[file], &options),
        Err(Error::CompareMismatch {
            offset: 0,
            values: None
        })
    ));
    assert!(session.crp_enabled());
}

#[test]
fn read_past_address_space_is_rejected_locally() {
    let (mut session, handle) = connected(config());

    assert!(matches!(
        FlashReader::read_to_vec(&mut session, &progress(), 0xFFFF_F000, 0x2000),
        Err(Error::InvalidInput(_))
    ));
    assert_eq!(handle.written_len(), 0);
}

#[test]
fn read_image_writes_output_file() {
    let (mut session, handle) = connected(config());
    let data = pattern(FlashReader::READ_CHUNK_SIZE as usize + 64);
    let chunk = FlashReader::READ_CHUNK_SIZE as usize;
    script_read(&handle, 0x1000, &data[..chunk], true);
    script_read(&handle, 0x1000 + chunk as u32, &data[chunk..], true);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dump.bin");
    let file = ReadFlashFile {
        file_path: path.to_string_lossy().into_owned(),
        address: 0x1000,
        size: data.len() as u32,
    };
    FlashReader::read_image(&mut session, &progress(), &file).unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), data);
    assert_eq!(handle.remaining(), 0);
}

#[test]
fn erase_sectors_unlocks_prepares_and_erases() {
    let (mut session, handle) = connected(config());
    handle
        .command("U 23130", &["0"])
        .command("P 1 3", &["0"])
        .command("E 1 3", &["0"]);

    let range = SectorRange::new(1, 3).unwrap();
    EraseOps::erase_sectors(&mut session, &progress(), range).unwrap();
    assert_eq!(handle.written_lines(), vec!["U 23130", "P 1 3", "E 1 3"]);

    handle.clear_written();
    assert!(EraseOps::erase_sectors(&mut session, &progress(), SectorRange::single(0)).is_err());
    assert_eq!(handle.written_len(), 0);
}

#[test]
fn blank_check_reports_result() {
    let (mut session, handle) = connected(config());
    handle
        .command("I 0 0", &["8", "0", "268439552"])
        .command("I 1 7", &["0"]);
    let result =
        EraseOps::blank_check(&mut session, &progress(), SectorRange::new(0, 7).unwrap()).unwrap();
    assert!(matches!(result, BlankCheck::BootRemapped { .. }));
}
