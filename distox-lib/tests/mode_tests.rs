mod common;

use common::{FakeState, fake_session};
use distox_lib::{DistoError, Model};

#[tokio::test]
async fn test_set_calibration_twice_sends_one_command() {
    let (mut distox, device) = fake_session(FakeState::new(Model::X310));

    let mode = distox.set_calibration(true).await.unwrap();
    assert!(mode.calibration());
    let again = distox.set_calibration(true).await.unwrap();
    assert_eq!(again, mode);

    let device = device.lock();
    assert_eq!(device.commands, vec![0x31]);
    assert_eq!(device.mode, 0x0020);
}

#[tokio::test]
async fn test_silent_mode_on_a3() {
    let mut state = FakeState::new(Model::A3);
    state.mode = 0x08;
    let (mut distox, device) = fake_session(state);

    let mode = distox.set_silent(true).await.unwrap();
    assert_eq!(mode.bits, 0x18);
    assert!(mode.calibration());

    let mode = distox.set_silent(false).await.unwrap();
    assert_eq!(mode.bits, 0x08);
    assert_eq!(device.lock().commands, vec![0x33, 0x32]);
}

#[tokio::test]
async fn test_stubborn_device_fails_after_three_attempts() {
    let mut state = FakeState::new(Model::X310);
    state.stubborn = true;
    state.mode = 0x0200;
    let (mut distox, device) = fake_session(state);

    match distox.set_calibration(true).await {
        Err(DistoError::ModeToggleFailed { expected, actual }) => {
            assert_eq!(expected, 0x0220);
            assert_eq!(actual, Some(0x0200));
        }
        other => panic!("expected ModeToggleFailed, got {:?}", other),
    }
    assert_eq!(device.lock().commands, vec![0x31, 0x31, 0x31]);
    assert!(!distox.is_open());
}

#[tokio::test]
async fn test_toggle_calibration_flips_current_bit() {
    let mut state = FakeState::new(Model::X310);
    state.mode = 0x0020;
    let (mut distox, device) = fake_session(state);

    let mode = distox.toggle_calibration().await.unwrap();
    assert!(!mode.calibration());
    assert_eq!(device.lock().commands, vec![0x30]);
}

#[tokio::test]
async fn test_read_mode_retries_missed_reply() {
    let mut state = FakeState::new(Model::A3);
    state.mode = 0x10;
    state.mute_replies = 2;
    let (mut distox, device) = fake_session(state);

    let mode = distox.read_mode().await.unwrap();
    assert!(mode.silent());
    assert_eq!(device.lock().requests.len(), 3);
}

#[tokio::test]
async fn test_read_mode_gives_up_after_three_attempts() {
    let mut state = FakeState::new(Model::A3);
    state.mute_replies = 5;
    let (mut distox, device) = fake_session(state);

    assert!(matches!(distox.read_mode().await, Err(DistoError::NoReply(_))));
    assert_eq!(device.lock().requests.len(), 3);
}

#[tokio::test]
async fn test_grad_and_compass_are_unsupported_without_wire_traffic() {
    let (mut distox, device) = fake_session(FakeState::new(Model::A3));

    assert!(matches!(distox.set_grad(true).await, Err(DistoError::UnsupportedOperation(_))));
    assert!(matches!(distox.set_compass(false).await, Err(DistoError::UnsupportedOperation(_))));

    let device = device.lock();
    assert_eq!(device.connects, 0);
    assert!(device.requests.is_empty());
}

#[tokio::test]
async fn test_mode_operations_close_their_session() {
    let (mut distox, device) = fake_session(FakeState::new(Model::X310));

    distox.read_mode().await.unwrap();
    distox.read_mode().await.unwrap();
    assert!(!distox.is_open());
    assert_eq!(device.lock().connects, 2);

    // an explicitly opened session stays open
    distox.open().await.unwrap();
    distox.read_mode().await.unwrap();
    assert!(distox.is_open());
    assert_eq!(device.lock().connects, 3);
}

#[tokio::test]
async fn test_hang_up_closes_an_explicitly_opened_session() {
    let (mut distox, device) = fake_session(FakeState::new(Model::X310));

    distox.open().await.unwrap();
    distox.put_command(distox_lib::frame::Command::StartSilent);
    device.lock().hang_up = true;

    assert!(matches!(distox.read_mode().await, Err(DistoError::TransportClosed)));
    assert!(!distox.is_open());
    assert_eq!(distox.queues().command_len(), 0);
}

#[tokio::test]
async fn test_toggle_retries_when_verify_read_is_lost() {
    let mut state = FakeState::new(Model::X310);
    // request 0 reads the mode, request 1 verifies the first toggle
    state.muted = vec![1];
    let (mut distox, device) = fake_session(state);

    let mode = distox.set_calibration(true).await.unwrap();
    assert!(mode.calibration());

    let device = device.lock();
    assert_eq!(device.commands, vec![0x31, 0x31]);
    assert_eq!(device.requests.len(), 3);
    assert_eq!(device.mode, 0x0020);
}
