use super::*;
use crate::error::WriteError;
use crate::leap::LeapExecutor;
use crate::page::PageWriter;
use crate::scanner::{ScanOptions, SignatureScanner, SpmSequenceLocation};

fn writer(mcu: SimMcu) -> (PageWriter<SimMcu>, SpmSequenceLocation) {
    let device = *mcu.device();
    let mut scanner = SignatureScanner::new(device, ScanOptions::default());
    let sequence = scanner.find(&mcu).unwrap();
    (PageWriter::new(LeapExecutor::new(mcu, device), scanner), sequence)
}

#[test]
fn empty_payload_leaves_erased_page() {
    let mut mcu = sim_with_sequences(&[0x1_F900]);
    mcu.load(addr(0x1_F800), &[0x00; 256]);
    let (mut writer, mut sequence) = writer(mcu);

    writer.write_page(&mut sequence, &[], addr(0x1_F800)).unwrap();

    let mcu = writer.executor().mcu();
    assert!(mcu.page(addr(0x1_F800)).iter().all(|&b| b == 0xFF));
    let mut expected = std::vec![Some(FlashCommand::Enable); 128];
    expected.extend([Some(FlashCommand::Erase), Some(FlashCommand::WritePage)]);
    assert_eq!(commands(mcu.log()), expected);
}

#[test]
fn full_page_is_staged_word_by_word() {
    let data: Vec<u8> = (0..=255u8).collect();
    let (mut writer, mut sequence) = writer(sim_with_sequences(&[0x1_F900]));

    writer.write_page(&mut sequence, &data, addr(0x1_FA00)).unwrap();

    let mcu = writer.executor().mcu();
    assert_eq!(mcu.page(addr(0x1_FA00)), data.as_slice());
    let log = mcu.log();
    assert_eq!(log[0].target, addr(0x1_FA00));
    assert_eq!(log[0].payload, 0x0100);
    assert_eq!(log[127].target, addr(0x1_FAFE));
    assert_eq!(log[127].payload, 0xFFFE);
    // Erase and commit carry the last word.
    assert_eq!(log[128].payload, 0xFFFE);
    assert_eq!(log[129].payload, 0xFFFE);
    assert!(log.iter().all(|record| record.result.is_ok()));
}

#[test]
fn partial_payload_is_padded() {
    let mut mcu = sim_with_sequences(&[0x1_F900]);
    mcu.load(addr(0x1_FC00), &[0x12; 256]);
    let (mut writer, mut sequence) = writer(mcu);

    writer.write_page(&mut sequence, &[1, 2, 3], addr(0x1_FC00)).unwrap();

    let page = writer.executor().mcu().page(addr(0x1_FC00));
    assert_eq!(&page[..4], &[1, 2, 3, 0xFF]);
    assert!(page[4..].iter().all(|&b| b == 0xFF));
}

#[test]
fn erasing_last_copy_loses_sequence_without_commit() {
    let (mut writer, mut sequence) = writer(sim_with_sequences(&[0x1_F900]));

    let result = writer.write_page(&mut sequence, &[0xAA; 256], addr(0x1_F900));
    assert_eq!(result, Err(WriteError::SequenceLost));

    let mcu = writer.executor().mcu();
    assert_eq!(mcu.log().len(), 129);
    assert_eq!(mcu.log().last().unwrap().command, Some(FlashCommand::Erase));
    assert!(targets_of(mcu.log(), FlashCommand::WritePage).is_empty());
    assert!(mcu.page(addr(0x1_F900)).iter().all(|&b| b == 0xFF));
}

#[test]
fn erase_of_used_copy_moves_to_surviving_one() {
    let (mut writer, mut sequence) = writer(sim_with_sequences(&[0x1_F900, 0x1_FF00]));
    assert_eq!(sequence.address, addr(0x1_F900));

    writer.write_page(&mut sequence, &[0x55; 256], addr(0x1_F900)).unwrap();

    assert_eq!(sequence.address, addr(0x1_FF00));
    let log = writer.executor().mcu().log();
    assert_eq!(log[128].sequence, addr(0x1_F900));
    assert_eq!(log[129].sequence, addr(0x1_FF00));
    assert!(writer.executor().mcu().page(addr(0x1_F900)).iter().all(|&b| b == 0x55));
}

#[test]
fn bad_requests_do_not_leap() {
    let (mut writer, mut sequence) = writer(sim_with_sequences(&[0x1_F900]));

    assert_eq!(
        writer.write_page(&mut sequence, &[0; 257], addr(0x1_F800)),
        Err(WriteError::Oversized { len: 257 })
    );
    assert_eq!(
        writer.write_page(&mut sequence, &[0; 2], addr(0x1_F802)),
        Err(WriteError::Misaligned { dest: addr(0x1_F802) })
    );
    assert_eq!(
        writer.write_page(&mut sequence, &[0; 2], addr(0x1_F700)),
        Err(WriteError::OutOfRange { dest: addr(0x1_F700) })
    );
    assert!(writer.executor().mcu().log().is_empty());
}

#[test]
fn spm_outside_boot_section_fails_read_back() {
    // Scan range reaching into the application section, where `spm` has no effect.
    let device = Device {
        scan_start: addr(0x1_F000),
        ..Device::ATMEGA1284P
    };
    let mut mcu = SimMcu::new(device);
    mcu.load_words(addr(0x1_F000), &sts_sequence(24));
    mcu.load(addr(0x1_F800), &[0x00; 256]);
    let (mut writer, mut sequence) = writer(mcu);
    assert_eq!(sequence.address, addr(0x1_F000));

    let result = writer.write_page(&mut sequence, &[], addr(0x1_F800));
    assert_eq!(result, Err(WriteError::VerifyFailed { offset: 0 }));
}
