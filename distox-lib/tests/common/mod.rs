//! Common test utilities: a scripted DistoX on the far side of an
//! in-memory duplex pipe.

// Shared across test files; not every helper is used in each one
#![allow(dead_code)]

use distox_lib::mode::ModeFlag;
use distox_lib::{Connector, DeviceConfig, DistoError, DistoX, Model};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const PAGE: usize = 256;

/// Decode a hex string into one frame
pub fn frame(hex_data: &str) -> [u8; 8] {
    hex::decode(hex_data)
        .expect("Failed to decode hex")
        .try_into()
        .expect("Frame must be 8 bytes")
}

/// Everything the fake device knows and everything it saw.
pub struct FakeState {
    pub model: Model,
    pub mode: u16,
    /// Ignore mode commands
    pub stubborn: bool,
    /// Word-addressed memory, 0xff where unset
    pub memory: HashMap<u16, [u8; 4]>,
    pub flash: Vec<[u8; PAGE]>,
    /// Frames to stream, front first; each ack releases the next
    pub stream: VecDeque<[u8; 8]>,
    /// On each connection, start streaming only after the first
    /// addressed request
    pub hold_stream: bool,
    /// Leave this many addressed requests unanswered
    pub mute_replies: usize,
    /// Indices (into `requests`) of addressed requests left unanswered
    pub muted: Vec<usize>,
    /// Close the pipe on the next status or memory read
    pub hang_up: bool,
    /// Send only this many bytes of the first streamed frame, then the
    /// whole frame once the host has given up on it
    pub truncate_first: Option<usize>,
    /// Added to every echoed address
    pub address_skew: u16,
    pub requests: Vec<(u8, u16)>,
    pub commands: Vec<u8>,
    pub acks: Vec<u8>,
    pub page_reads: Vec<u8>,
    pub page_writes: Vec<u8>,
    pub connects: usize,
}

impl FakeState {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            mode: 0,
            stubborn: false,
            memory: HashMap::new(),
            flash: (0..PAGE).map(|p| [p as u8; PAGE]).collect(),
            stream: VecDeque::new(),
            hold_stream: false,
            mute_replies: 0,
            muted: Vec::new(),
            hang_up: false,
            truncate_first: None,
            address_skew: 0,
            requests: Vec::new(),
            commands: Vec::new(),
            acks: Vec::new(),
            page_reads: Vec::new(),
            page_writes: Vec::new(),
            connects: 0,
        }
    }

    fn read_word(&self, address: u16) -> [u8; 4] {
        if address == self.model.status_address() {
            let [lo, hi] = self.mode.to_le_bytes();
            return match self.model {
                Model::A3 => [lo, 0, 0, 0],
                Model::X310 => [lo, hi, 0, 0],
            };
        }
        if address == self.model.head_tail_address() {
            let remaining = self.stream.len() as u16;
            let head = match self.model {
                Model::A3 => remaining * 8,
                Model::X310 => remaining / 2,
            };
            let [h0, h1] = head.to_le_bytes();
            return [h0, h1, 0, 0];
        }
        self.memory.get(&address).copied().unwrap_or([0xFF; 4])
    }

    fn apply_command(&mut self, command: u8) {
        self.commands.push(command);
        if self.stubborn {
            return;
        }
        let flag = if command < 0x32 { ModeFlag::Calibration } else { ModeFlag::Silent };
        let mask = flag.mask(self.model).expect("mode bit");
        if command & 1 == 1 {
            self.mode |= mask;
        } else {
            self.mode &= !mask;
        }
    }

    /// Returns false when the reply should be swallowed.
    fn answer(&mut self, opcode: u8, address: u16) -> bool {
        let index = self.requests.len();
        self.requests.push((opcode, address));
        if self.muted.contains(&index) {
            return false;
        }
        if self.mute_replies > 0 {
            self.mute_replies -= 1;
            return false;
        }
        true
    }

    fn echo(&self, opcode: u8, address: u16, data: [u8; 4]) -> [u8; 8] {
        let [lo, hi] = address.wrapping_add(self.address_skew).to_le_bytes();
        [opcode, lo, hi, data[0], data[1], data[2], data[3], 0]
    }
}

pub type Shared = Arc<Mutex<FakeState>>;

async fn read_address(server: &mut DuplexStream) -> Option<u16> {
    let mut addr = [0u8; 2];
    server.read_exact(&mut addr).await.ok()?;
    Some(u16::from_le_bytes(addr))
}

async fn send_next_frame(server: &mut DuplexStream, state: &Shared) -> Option<()> {
    let (next, truncate) = {
        let mut s = state.lock();
        (s.stream.front().copied(), s.truncate_first.take())
    };
    if let Some(frame) = next {
        if let Some(len) = truncate {
            server.write_all(&frame[..len]).await.ok()?;
            // past the host's read timeout and drain
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        server.write_all(&frame).await.ok()?;
    }
    Some(())
}

async fn serve(mut server: DuplexStream, state: Shared) -> Option<()> {
    let mut streaming = !state.lock().hold_stream;
    if streaming {
        send_next_frame(&mut server, &state).await?;
    }
    loop {
        let mut lead = [0u8; 1];
        server.read_exact(&mut lead).await.ok()?;
        match lead[0] {
            0x38 => {
                let address = read_address(&mut server).await?;
                if state.lock().hang_up {
                    return None;
                }
                let reply = {
                    let mut s = state.lock();
                    let word = s.read_word(address);
                    s.answer(0x38, address).then(|| s.echo(0x38, address, word))
                };
                if let Some(reply) = reply {
                    server.write_all(&reply).await.ok()?;
                    if !streaming {
                        streaming = true;
                        send_next_frame(&mut server, &state).await?;
                    }
                }
            }
            0x39 => {
                let address = read_address(&mut server).await?;
                let mut word = [0u8; 4];
                server.read_exact(&mut word).await.ok()?;
                let reply = {
                    let mut s = state.lock();
                    s.memory.insert(address, word);
                    s.answer(0x39, address).then(|| s.echo(0x38, address, word))
                };
                if let Some(reply) = reply {
                    server.write_all(&reply).await.ok()?;
                }
            }
            0x3A => {
                let address = read_address(&mut server).await?;
                let reply = {
                    let mut s = state.lock();
                    s.page_reads.push(address as u8);
                    let page = s.flash[usize::from(address & 0xFF)];
                    s.answer(0x3A, address).then(|| (s.echo(0x3A, address, [0; 4]), page))
                };
                if let Some((echo, page)) = reply {
                    server.write_all(&echo).await.ok()?;
                    server.write_all(&page).await.ok()?;
                }
            }
            0x3B => {
                let address = read_address(&mut server).await?;
                let mut page = [0u8; PAGE];
                server.read_exact(&mut page).await.ok()?;
                let reply = {
                    let mut s = state.lock();
                    s.page_writes.push(address as u8);
                    s.flash[usize::from(address & 0xFF)] = page;
                    s.answer(0x3B, address).then(|| s.echo(0x3B, address, [0; 4]))
                };
                if let Some(reply) = reply {
                    server.write_all(&reply).await.ok()?;
                }
            }
            command @ 0x30..=0x33 => state.lock().apply_command(command),
            ack @ (0x55 | 0xD5) => {
                {
                    let mut s = state.lock();
                    s.acks.push(ack);
                    s.stream.pop_front();
                }
                send_next_frame(&mut server, &state).await?;
            }
            _ => {}
        }
    }
}

/// Connects sessions to a [`FakeState`], one served pipe per connect.
#[derive(Clone)]
pub struct FakeConnector {
    pub state: Shared,
}

impl FakeConnector {
    pub fn new(state: FakeState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }
}

impl Connector for FakeConnector {
    type Stream = DuplexStream;

    async fn connect(&self) -> Result<DuplexStream, DistoError> {
        let (client, server) = tokio::io::duplex(4096);
        self.state.lock().connects += 1;
        tokio::spawn(serve(server, self.state.clone()));
        Ok(client)
    }
}

pub fn test_config(model: Model) -> DeviceConfig {
    DeviceConfig::new("/dev/null")
        .with_model(model)
        .with_read_timeout(Duration::from_millis(100))
}

/// Lets the fake device task catch up with bytes the host already sent.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Route library logs through the test harness; RUST_LOG=debug shows
/// every request and reply.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// A session on a fresh fake device, plus a handle to the device state.
pub fn fake_session(state: FakeState) -> (DistoX<FakeConnector>, Shared) {
    init_tracing();
    let config = test_config(state.model);
    let connector = FakeConnector::new(state);
    let shared = connector.state.clone();
    (DistoX::new(config, connector), shared)
}
