use crate::bootloader::{Bootloader, Page};
use crate::calib::{CalibrationCoefficients, CalibrationSample};
use crate::channel::PacketChannel;
use crate::config::{DeviceConfig, Model};
use crate::constants::DRAIN_QUIET;
use crate::controller::ModeController;
use crate::error::DistoError;
use crate::frame::Command;
use crate::measurement::Measurement;
use crate::memory::{HeadTail, MemoryAccess};
use crate::mode::DeviceMode;
use crate::router::{PacketRouter, Queues, Routed};
use crate::transport::{Connector, SerialConnector};
use tracing::{debug, info, warn};

/// How many frames [`DistoX::download`] should pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadCount {
    /// Until the device stays quiet for the whole retry budget
    #[default]
    Unbounded,
    /// Stop after this many new frames
    Exact(usize),
    /// Ask the device how many frames it holds, and ask again when it stops
    AskDevice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadEvent {
    Reset,
    Download(usize),
    Done,
}

/// Progress observer for the download loop.
pub trait DownloadListener {
    fn reset(&mut self) {}
    /// Called with the running count of new frames.
    fn download(&mut self, _count: usize) {}
    fn done(&mut self) {}
}

impl<F> DownloadListener for F
where
    F: FnMut(DownloadEvent) + Send,
{
    fn reset(&mut self) {
        self(DownloadEvent::Reset)
    }

    fn download(&mut self, count: usize) {
        self(DownloadEvent::Download(count))
    }

    fn done(&mut self) {
        self(DownloadEvent::Done)
    }
}

/// A session with one DistoX.
///
/// Configuration and firmware operations open the transport on demand and
/// close it again when they opened it. A fatal transport fault always
/// leaves the session closed.
pub struct DistoX<C: Connector> {
    config: DeviceConfig,
    connector: C,
    channel: Option<PacketChannel<C::Stream>>,
    router: PacketRouter,
    listener: Option<Box<dyn DownloadListener + Send>>,
}

impl DistoX<SerialConnector> {
    /// Session on the serial device named in `config`.
    pub fn from_config(config: DeviceConfig) -> Self {
        let connector = SerialConnector::new(config.path.clone()).with_baud_rate(config.baud_rate);
        Self::new(config, connector)
    }
}

impl<C: Connector> DistoX<C> {
    pub fn new(config: DeviceConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            channel: None,
            router: PacketRouter::new(Queues::new()),
            listener: None,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn model(&self) -> Model {
        self.config.model
    }

    /// Handle to the session's queues.
    pub fn queues(&self) -> &Queues {
        self.router.queues()
    }

    pub fn set_listener(&mut self, listener: impl DownloadListener + Send + 'static) {
        self.listener = Some(Box::new(listener));
    }

    pub fn clear_listener(&mut self) {
        self.listener = None;
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    pub async fn open(&mut self) -> Result<(), DistoError> {
        if self.channel.is_some() {
            return Ok(());
        }
        let stream = self.connector.connect().await?;
        self.channel = Some(PacketChannel::new(stream, self.config.read_timeout));
        self.router.reset();
        info!("Session open ({})", self.config.model);
        Ok(())
    }

    /// Drops the transport and discards queued frames and commands.
    pub fn close(&mut self) {
        if self.channel.take().is_some() {
            info!("Session closed");
        }
        self.router.queues().clear();
        self.router.reset();
    }

    pub async fn reconnect(&mut self) -> Result<(), DistoError> {
        info!("Reconnecting");
        self.close();
        self.open().await
    }

    fn channel_mut(&mut self) -> Result<&mut PacketChannel<C::Stream>, DistoError> {
        self.channel.as_mut().ok_or(DistoError::NotOpen)
    }

    /// Opens the session if needed; true when this call opened it.
    async fn ensure_open(&mut self) -> Result<bool, DistoError> {
        if self.is_open() {
            return Ok(false);
        }
        self.open().await?;
        Ok(true)
    }

    fn finish<T>(&mut self, opened: bool, result: Result<T, DistoError>) -> Result<T, DistoError> {
        if let Err(e) = &result {
            warn!("Operation failed: {}", e);
        }
        if opened || result.as_ref().is_err_and(DistoError::is_fatal) {
            self.close();
        }
        result
    }

    fn controller(&mut self) -> Result<ModeController<'_, C::Stream>, DistoError> {
        let model = self.config.model;
        let status_address = self.config.status_address();
        let attempts = self.config.attempts;
        Ok(ModeController::new(self.channel_mut()?, model, status_address, attempts))
    }

    fn memory(&mut self) -> Result<MemoryAccess<'_, C::Stream>, DistoError> {
        let attempts = self.config.attempts;
        Ok(MemoryAccess::new(self.channel_mut()?, attempts))
    }

    fn bootloader(&mut self) -> Result<Bootloader<'_, C::Stream>, DistoError> {
        let attempts = self.config.attempts;
        Ok(Bootloader::new(self.channel_mut()?, attempts))
    }

    pub fn put_command(&self, command: Command) {
        self.queues().put_command(command);
    }

    /// Sends every staged command, in order. Returns how many were sent.
    pub async fn write_commands(&mut self) -> Result<usize, DistoError> {
        let commands = self.queues().take_commands();
        let channel = self.channel_mut()?;
        for command in &commands {
            debug!("Sending {}", command);
            channel.send_byte((*command).into()).await?;
        }
        Ok(commands.len())
    }

    pub fn next_measurement(&self) -> Option<Measurement> {
        self.queues().next_measurement(self.config.model)
    }

    pub fn next_calibration(&self) -> Option<CalibrationSample> {
        self.queues().next_calibration()
    }

    /// Pulls streamed frames into the queues. Running out of the timeout
    /// budget ends the download normally; framing and transport faults
    /// are returned, and transport faults close the session.
    pub async fn download(&mut self, count: DownloadCount) -> Result<usize, DistoError> {
        self.open().await?;
        let result = self.download_frames(count).await;
        if let Some(listener) = self.listener.as_mut() {
            listener.done();
        }
        self.finish(false, result)
    }

    async fn download_frames(&mut self, count: DownloadCount) -> Result<usize, DistoError> {
        if let Some(listener) = self.listener.as_mut() {
            listener.reset();
        }
        self.write_commands().await?;

        if count == DownloadCount::AskDevice {
            let pending = self.pending_on_open_session().await?;
            info!("Device reports {} pending frames", pending);
            if pending == 0 {
                return Ok(0);
            }
        }

        let acknowledge = self.config.acknowledge;
        let retries = self.config.download_retries;
        let mut budget = retries;
        let mut received = 0;
        let mut round_start = 0;
        loop {
            if let DownloadCount::Exact(n) = count {
                if received >= n {
                    break;
                }
            }

            let channel = self.channel.as_mut().ok_or(DistoError::NotOpen)?;
            match channel.read_frame().await {
                Ok(frame) => {
                    if acknowledge {
                        channel.send_byte(frame.ack_byte()).await?;
                    }
                    budget = retries;
                    if self.router.route(frame) == Routed::Duplicate {
                        continue;
                    }
                    received += 1;
                    if let Some(listener) = self.listener.as_mut() {
                        listener.download(received);
                    }
                }
                Err(DistoError::PartialReply { actual, .. }) => {
                    warn!("Discarding partial frame ({} bytes)", actual);
                    channel.drain(DRAIN_QUIET).await?;
                }
                Err(e) if e.is_retryable() => {
                    budget -= 1;
                    if budget >= 0 {
                        debug!("No frame, {} retries left", budget);
                        continue;
                    }
                    if count != DownloadCount::AskDevice || received == round_start {
                        break;
                    }
                    // the stream stopped; ask whether the device still holds frames
                    let pending = self.pending_on_open_session().await?;
                    if pending == 0 {
                        break;
                    }
                    info!("Device still reports {} pending frames", pending);
                    round_start = received;
                    budget = retries;
                }
                Err(e) => return Err(e),
            }
        }

        info!("Downloaded {} frames", received);
        Ok(received)
    }

    async fn pending_on_open_session(&mut self) -> Result<usize, DistoError> {
        let model = self.config.model;
        let head_tail = self.memory()?.read_head_tail(model).await?;
        Ok(head_tail.pending_frames(model))
    }

    pub async fn read_mode(&mut self) -> Result<DeviceMode, DistoError> {
        let opened = self.ensure_open().await?;
        let result = self.controller()?.read_mode().await;
        self.finish(opened, result)
    }

    pub async fn set_calibration(&mut self, on: bool) -> Result<DeviceMode, DistoError> {
        let opened = self.ensure_open().await?;
        let result = self.controller()?.set_calibration(on).await;
        self.finish(opened, result)
    }

    pub async fn toggle_calibration(&mut self) -> Result<DeviceMode, DistoError> {
        let opened = self.ensure_open().await?;
        let result = self.controller()?.toggle_calibration().await;
        self.finish(opened, result)
    }

    pub async fn set_silent(&mut self, on: bool) -> Result<DeviceMode, DistoError> {
        let opened = self.ensure_open().await?;
        let result = self.controller()?.set_silent(on).await;
        self.finish(opened, result)
    }

    pub async fn set_grad(&mut self, _on: bool) -> Result<DeviceMode, DistoError> {
        Err(DistoError::UnsupportedOperation("grad mode"))
    }

    pub async fn set_compass(&mut self, _on: bool) -> Result<DeviceMode, DistoError> {
        Err(DistoError::UnsupportedOperation("compass/clino mode"))
    }

    pub async fn read_head_tail(&mut self) -> Result<HeadTail, DistoError> {
        let opened = self.ensure_open().await?;
        let model = self.config.model;
        let result = self.memory()?.read_head_tail(model).await;
        self.finish(opened, result)
    }

    pub async fn pending_count(&mut self) -> Result<usize, DistoError> {
        let model = self.config.model;
        Ok(self.read_head_tail().await?.pending_frames(model))
    }

    pub async fn read_memory(&mut self, start: u16, len: usize) -> Result<Vec<u8>, DistoError> {
        let opened = self.ensure_open().await?;
        let result = self.memory()?.read_range(start, len).await;
        self.finish(opened, result)
    }

    pub async fn read_coefficients(&mut self) -> Result<CalibrationCoefficients, DistoError> {
        let opened = self.ensure_open().await?;
        let model = self.config.model;
        let result = self.memory()?.read_coefficients(model).await;
        self.finish(opened, result)
    }

    pub async fn write_coefficients(
        &mut self,
        coefficients: &CalibrationCoefficients,
    ) -> Result<(), DistoError> {
        let opened = self.ensure_open().await?;
        let model = self.config.model;
        let result = self.memory()?.write_coefficients(model, coefficients).await;
        self.finish(opened, result)
    }

    pub async fn bootloader_read_page(&mut self, page: u8) -> Result<Page, DistoError> {
        let opened = self.ensure_open().await?;
        let result = self.bootloader()?.read_page(page).await;
        self.finish(opened, result)
    }

    pub async fn bootloader_write_page(&mut self, page: u8, data: &Page) -> Result<(), DistoError> {
        let opened = self.ensure_open().await?;
        let result = self.bootloader()?.write_page(page, data).await;
        self.finish(opened, result)
    }

    pub async fn firmware_read(&mut self, end_page: usize) -> Result<Vec<u8>, DistoError> {
        let opened = self.ensure_open().await?;
        let result = self.bootloader()?.firmware_read(end_page).await;
        self.finish(opened, result)
    }

    pub async fn bootloader_dump(&mut self) -> Result<Vec<u8>, DistoError> {
        let opened = self.ensure_open().await?;
        let result = self.bootloader()?.dump().await;
        self.finish(opened, result)
    }

    pub async fn firmware_write(&mut self, image: &[u8]) -> Result<usize, DistoError> {
        let opened = self.ensure_open().await?;
        let result = self.bootloader()?.firmware_write(image).await;
        self.finish(opened, result)
    }
}
