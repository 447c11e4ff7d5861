mod common;

use common::{FakeState, PAGE, fake_session};
use distox_lib::{DistoError, Model};

#[tokio::test]
async fn test_read_page() {
    let (mut distox, device) = fake_session(FakeState::new(Model::X310));

    let page = distox.bootloader_read_page(0x05).await.unwrap();
    assert_eq!(page, [0x05; PAGE]);
    assert_eq!(device.lock().requests, vec![(0x3A, 0x0005)]);
}

#[tokio::test]
async fn test_read_page_restarts_after_timeout() {
    let mut state = FakeState::new(Model::X310);
    state.mute_replies = 1;
    let (mut distox, device) = fake_session(state);

    let page = distox.bootloader_read_page(0x21).await.unwrap();
    assert_eq!(page, [0x21; PAGE]);
    assert_eq!(device.lock().page_reads, vec![0x21, 0x21]);
}

#[tokio::test]
async fn test_echo_mismatch_is_reported_not_retried() {
    let mut state = FakeState::new(Model::X310);
    state.address_skew = 1;
    let (mut distox, device) = fake_session(state);

    assert!(matches!(
        distox.bootloader_read_page(0x10).await,
        Err(DistoError::WrongAddress { expected: 0x10, actual: 0x11 })
    ));
    assert_eq!(device.lock().page_reads, vec![0x10]);
}

#[tokio::test]
async fn test_write_single_page() {
    let (mut distox, device) = fake_session(FakeState::new(Model::X310));

    let mut data = [0u8; PAGE];
    for (i, b) in data.iter_mut().enumerate() {
        *b = i as u8;
    }
    distox.bootloader_write_page(0x02, &data).await.unwrap();

    let device = device.lock();
    assert_eq!(device.page_writes, vec![0x02]);
    assert_eq!(device.flash[2], data);
}

#[tokio::test]
async fn test_firmware_write_skips_protected_pages() {
    let (mut distox, device) = fake_session(FakeState::new(Model::X310));

    // ten pages, the last one partial
    let image: Vec<u8> = (0..9 * PAGE + 10).map(|i| (i % 251) as u8).collect();
    let written = distox.firmware_write(&image).await.unwrap();
    assert_eq!(written, 2);

    let device = device.lock();
    assert_eq!(device.page_writes, vec![0x08, 0x09]);
    assert_eq!(device.flash[8][..], image[8 * PAGE..9 * PAGE]);
    assert_eq!(device.flash[9][..10], image[9 * PAGE..]);
    assert!(device.flash[9][10..].iter().all(|&b| b == 0));
    // protected pages untouched
    assert_eq!(device.flash[0], [0x00; PAGE]);
    assert_eq!(device.flash[7], [0x07; PAGE]);
}

#[tokio::test]
async fn test_firmware_write_of_bootloader_sized_image_writes_nothing() {
    let (mut distox, device) = fake_session(FakeState::new(Model::X310));

    assert_eq!(distox.firmware_write(&[0xAA; 8 * PAGE]).await.unwrap(), 0);
    assert!(device.lock().page_writes.is_empty());
}

#[tokio::test]
async fn test_firmware_read_concatenates_pages() {
    let (mut distox, _) = fake_session(FakeState::new(Model::X310));

    let image = distox.firmware_read(4).await.unwrap();
    assert_eq!(image.len(), 4 * PAGE);
    for (page, chunk) in image.chunks(PAGE).enumerate() {
        assert!(chunk.iter().all(|&b| b == page as u8));
    }
}

#[tokio::test]
async fn test_dump_reads_every_page() {
    let (mut distox, device) = fake_session(FakeState::new(Model::A3));

    let image = distox.bootloader_dump().await.unwrap();
    assert_eq!(image.len(), 256 * PAGE);
    assert_eq!(image[255 * PAGE], 0xFF);
    assert_eq!(device.lock().page_reads.len(), 256);
}

#[tokio::test]
async fn test_oversized_image_rejected_before_any_write() {
    let (mut distox, device) = fake_session(FakeState::new(Model::X310));

    assert!(matches!(
        distox.firmware_write(&vec![0u8; 256 * PAGE + 1]).await,
        Err(DistoError::PageOutOfRange(257))
    ));
    assert!(device.lock().page_writes.is_empty());
}
