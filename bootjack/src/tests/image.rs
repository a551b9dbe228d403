use super::*;
use crate::image::{BootImage, ImageError, IMAGE_CRC};

#[test]
fn empty_image_is_invalid() {
    assert_eq!(BootImage::new(&[]).unwrap_err(), ImageError::Empty);
}

#[test]
fn pages_are_split_in_order() {
    let data: Vec<u8> = (0..600).map(|i| i as u8).collect();
    let image = BootImage::new(&data).unwrap();
    assert_eq!(image.page_count(), 3);

    let pages: Vec<_> = image.pages().collect();
    assert_eq!(pages[0].0, 0);
    assert_eq!(pages[1].1, &data[256..512]);
    assert_eq!(pages[2].1.len(), 600 - 512);
}

#[test]
fn image_must_fit_boot_section() {
    let device = Device::ATMEGA1284P;
    let full = std::vec![0u8; 2048];
    assert_eq!(BootImage::new(&full).unwrap().check_fits(&device), Ok(()));

    let over = std::vec![0u8; 2049];
    assert_eq!(
        BootImage::new(&over).unwrap().check_fits(&device),
        Err(ImageError::TooLarge {
            len: 2049,
            capacity: 2048,
        })
    );
}

#[test]
fn checksum_is_crc32c() {
    // CRC-32/ISCSI check value.
    assert_eq!(IMAGE_CRC.checksum(b"123456789"), 0xE306_9283);

    let data = b"123456789";
    assert!(BootImage::verified(data, 0xE306_9283).is_ok());
    assert_eq!(
        BootImage::verified(data, 0).unwrap_err(),
        ImageError::CrcMismatch {
            expected: 0,
            actual: 0xE306_9283,
        }
    );
}
