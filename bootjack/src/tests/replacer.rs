use super::*;
use crate::error::{BootStatus, PageSlot, WriteError};
use crate::image::BootImage;
use crate::replacer::{progress_token, BootImageReplacer, ReplacerState};
use crate::scanner::{ScanOptions, SequenceKind};

fn replacer(mcu: SimMcu) -> BootImageReplacer<SimMcu> {
    BootImageReplacer::new(mcu, Device::ATMEGA1284P, ScanOptions::default())
}

fn pattern(pages: usize) -> Vec<u8> {
    (0..pages * 256).map(|i| 0xA0 | (i / 256) as u8).collect()
}

#[test]
fn locked_device_is_left_untouched() {
    let mcu = sim_with_sequences(&[0x1_F900]).with_lock_bits(0xEF);
    let before = mcu.flash().to_vec();
    let data = pattern(2);
    let image = BootImage::new(&data).unwrap();
    let mut link = Link::default();

    let mut replacer = replacer(mcu);
    let status = replacer.replace(&image, &mut link);

    assert_eq!(status, BootStatus::LockedDevice);
    assert_eq!(replacer.state(), ReplacerState::Failed(BootStatus::LockedDevice));
    assert!(replacer.mcu().log().is_empty());
    assert_eq!(replacer.mcu().flash(), before.as_slice());
    assert_eq!(link.lines(), ["AVRBCE9"]);
}

#[test]
fn only_self_programming_lock_bits_matter() {
    // Upper two bits are unused.
    let mcu = sim_with_sequences(&[0x1_F900]).with_lock_bits(0x3F);
    let data = pattern(1);
    let status = replacer(mcu).replace(&BootImage::new(&data).unwrap(), &mut Link::default());
    assert_eq!(status, BootStatus::Success);
}

#[test]
fn missing_sequence_is_reported_before_any_write() {
    let data = pattern(1);
    let mut link = Link::default();
    let mut replacer = replacer(SimMcu::atmega1284p());

    let status = replacer.replace(&BootImage::new(&data).unwrap(), &mut link);

    assert_eq!(status, BootStatus::SequenceNotFound);
    assert!(replacer.mcu().log().is_empty());
    assert_eq!(link.lines(), ["AVRBCE1"]);
}

#[test]
fn oversized_image_is_rejected() {
    let data = pattern(9);
    let mut link = Link::default();
    let mut replacer = replacer(sim_with_sequences(&[0x1_F900]));

    let status = replacer.replace(&BootImage::new(&data).unwrap(), &mut link);

    assert_eq!(status, BootStatus::InvalidImage);
    assert!(replacer.mcu().log().is_empty());
    assert_eq!(link.lines(), ["AVRBCE4"]);
}

#[test]
fn two_page_image_end_to_end() {
    let data = pattern(2);
    let image = BootImage::new(&data).unwrap();
    let mut link = Link::default();
    let mut replacer = replacer(sim_with_sequences(&[0x1_F900]));

    let status = replacer.replace(&image, &mut link);

    assert_eq!(status, BootStatus::Success);
    assert_eq!(replacer.state(), ReplacerState::Done);
    assert_eq!(link.lines(), ["AVRBPW00", "AVRBPW01", "AVRBOOT"]);

    let mcu = replacer.mcu();
    let log = mcu.log();
    // (words per page + erase + commit) for the guard page and both image pages.
    assert_eq!(log.len(), (128 + 2) * (1 + 2));
    assert_eq!(mcu.watchdog_feeds(), log.len());
    assert_eq!(targets_of(log, FlashCommand::Erase), [0x1_FF00, 0x1_F800, 0x1_F900]);
    assert_eq!(targets_of(log, FlashCommand::WritePage), [0x1_FF00, 0x1_F800, 0x1_F900]);

    // Page 1 is erased through its own copy, committed through the guard copy.
    let page1_erase = &log[2 * 130 + 128];
    assert_eq!(page1_erase.sequence, addr(0x1_F900));
    assert_eq!(log[2 * 130 + 129].sequence, addr(0x1_FF00));
    assert!(log[..2 * 130 + 129].iter().all(|record| record.sequence == addr(0x1_F900)));

    assert_eq!(mcu.page(addr(0x1_F800)), &data[..256]);
    assert_eq!(mcu.page(addr(0x1_F900)), &data[256..]);
    let guard = mcu.page(addr(0x1_FF00));
    let mut expected = [0xFF; 256];
    for (i, word) in sts_sequence(24).iter().enumerate() {
        expected[i * 2..i * 2 + 2].copy_from_slice(&word.to_le_bytes());
    }
    assert_eq!(guard, &expected[..]);
    assert_eq!(replacer.sequence().map(|s| s.address), Some(addr(0x1_FF00)));
}

#[test]
fn full_image_hands_over_to_its_own_sequence() {
    let mut data = pattern(8);
    // The new boot code carries an `out` form sequence in page 3.
    for (i, word) in out_sequence(20).iter().enumerate() {
        let at = 3 * 256 + 0x10 + i * 2;
        data[at..at + 2].copy_from_slice(&word.to_le_bytes());
    }
    let mut link = Link::default();
    let mut replacer = replacer(sim_with_sequences(&[0x1_F900]));

    let status = replacer.replace(&BootImage::new(&data).unwrap(), &mut link);

    assert_eq!(status, BootStatus::Success);
    assert_eq!(link.lines().len(), 9);
    let mcu = replacer.mcu();
    assert_eq!(mcu.log().len(), 130 * 9);
    assert_eq!(mcu.flash()[0x1_F800..], data[..]);
    let sequence = replacer.sequence().unwrap();
    assert_eq!(sequence.address, addr(0x1_FB10));
    assert_eq!(sequence.kind, SequenceKind::Out);
}

#[test]
fn sequence_only_in_guard_page_is_never_erased() {
    let data = pattern(1);
    let mut link = Link::default();
    let mut replacer = replacer(sim_with_sequences(&[0x1_FF40]));

    let status = replacer.replace(&BootImage::new(&data).unwrap(), &mut link);

    assert_eq!(
        status,
        BootStatus::WriteFailed {
            page: PageSlot::Guard,
            error: WriteError::LastCopy,
        }
    );
    assert!(replacer.mcu().log().is_empty());
    assert_eq!(link.lines(), ["AVRBCE3"]);
}

#[test]
fn decoy_is_skipped_and_copied_shape_is_the_real_one() {
    let mut mcu = SimMcu::atmega1284p();
    mcu.load_words(addr(0x1_F800), &sts_sequence(16));
    mcu.load_words(addr(0x1_FA20), &sts_sequence(26));
    let options = ScanOptions {
        skip_count: 1,
        ..ScanOptions::default()
    };
    let mut replacer = BootImageReplacer::new(mcu, Device::ATMEGA1284P, options);

    replacer.prepare().unwrap();

    let mcu = replacer.mcu();
    assert!(mcu.log().iter().all(|record| record.sequence == addr(0x1_FA20)));
    let guard = mcu.page(addr(0x1_FF00));
    assert_eq!(&guard[..2], &opcode::sts(26).to_le_bytes());
    assert!(replacer.is_prepared());
}

fn skipping_replacer(decoy: u32, real: u32) -> BootImageReplacer<SimMcu> {
    let mut mcu = SimMcu::atmega1284p();
    mcu.load_words(addr(decoy), &sts_sequence(16));
    mcu.load_words(addr(real), &sts_sequence(24));
    let options = ScanOptions {
        skip_count: 1,
        ..ScanOptions::default()
    };
    BootImageReplacer::new(mcu, Device::ATMEGA1284P, options)
}

#[test]
fn decoy_never_counts_as_a_spare_copy() {
    // The real copy is in the guard page, only the decoy would survive its erase.
    let mut replacer = skipping_replacer(0x1_F800, 0x1_FF40);

    assert_eq!(
        replacer.prepare(),
        Err(BootStatus::WriteFailed {
            page: PageSlot::Guard,
            error: WriteError::LastCopy,
        })
    );
    assert!(replacer.mcu().log().is_empty());
    assert_eq!(&replacer.mcu().page(addr(0x1_F800))[..2], &opcode::sts(16).to_le_bytes());
}

#[test]
fn decoy_is_never_driven_across_the_rewrite() {
    let mut replacer = skipping_replacer(0x1_F800, 0x1_F900);
    let data = pattern(2);
    let mut link = Link::default();

    let status = replacer.replace(&BootImage::new(&data).unwrap(), &mut link);

    assert_eq!(status, BootStatus::Success);
    let log = replacer.mcu().log();
    assert!(log.iter().all(|record| record.sequence != addr(0x1_F800)));
    assert!(log.iter().any(|record| record.sequence == addr(0x1_FF00)));
    assert_eq!(replacer.mcu().page(addr(0x1_F900)), &data[256..]);
}

#[test]
fn failed_page_stops_the_loop() {
    // A scan range into the application section: leaps succeed, nothing is programmed.
    let device = Device {
        scan_start: addr(0x1_F000),
        ..Device::ATMEGA1284P
    };
    let mut mcu = SimMcu::new(device);
    mcu.load_words(addr(0x1_F000), &sts_sequence(24));
    mcu.load(addr(0x1_FF00), &[0; 256]);
    let data = pattern(2);
    let mut link = Link::default();
    let mut replacer = BootImageReplacer::new(mcu, device, ScanOptions::default());

    let status = replacer.replace(&BootImage::new(&data).unwrap(), &mut link);

    assert_eq!(
        status,
        BootStatus::WriteFailed {
            page: PageSlot::Guard,
            error: WriteError::VerifyFailed { offset: 0 },
        }
    );
    assert_eq!(replacer.mcu().log().len(), 130);
    assert_eq!(link.lines(), ["AVRBCE3"]);
}

#[test]
fn status_tokens() {
    assert_eq!(BootStatus::Success.token(), "AVRBOOT");
    assert_eq!(BootStatus::SequenceNotFound.token(), "AVRBCE1");
    let lost = BootStatus::WriteFailed {
        page: PageSlot::Image(3),
        error: WriteError::SequenceLost,
    };
    assert_eq!(lost.token(), "AVRBCE2");
    assert_eq!(progress_token(0x0A).as_str(), "AVRBPW0A");
}
