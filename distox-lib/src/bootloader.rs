use crate::channel::PacketChannel;
use crate::constants::{
    DRAIN_QUIET, FRAME_SIZE, PAGE_COUNT, PAGE_FRAMES, PAGE_SIZE, PROTECTED_PAGES,
};
use crate::error::DistoError;
use crate::frame::Opcode;
use std::ops::Range;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

pub type Page = [u8; PAGE_SIZE];

/// Number of pages needed to hold `len` bytes.
pub fn end_page(len: usize) -> Result<usize, DistoError> {
    let end = len.div_ceil(PAGE_SIZE);
    if end > PAGE_COUNT {
        return Err(DistoError::PageOutOfRange(end));
    }
    Ok(end)
}

/// Pages a firmware image occupies, excluding the bootloader's own.
pub fn firmware_pages(len: usize) -> Result<Range<usize>, DistoError> {
    let end = end_page(len)?;
    Ok(PROTECTED_PAGES..end.max(PROTECTED_PAGES))
}

fn page_number(page: usize) -> Result<u8, DistoError> {
    u8::try_from(page).map_err(|_| DistoError::PageOutOfRange(page))
}

/// Page-level flash access while the device runs its bootloader.
pub struct Bootloader<'a, S> {
    channel: &'a mut PacketChannel<S>,
    attempts: usize,
}

impl<'a, S> Bootloader<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(channel: &'a mut PacketChannel<S>, attempts: usize) -> Self {
        Self {
            channel,
            attempts: attempts.max(1),
        }
    }

    async fn read_page_once(&mut self, page: u8) -> Result<Page, DistoError> {
        self.channel.request(Opcode::BootloaderRead, u16::from(page)).await?;
        let mut data = [0u8; PAGE_SIZE];
        for chunk in data.chunks_exact_mut(FRAME_SIZE).take(PAGE_FRAMES) {
            let frame = self.channel.read_frame().await?;
            chunk.copy_from_slice(frame.bytes());
        }
        Ok(data)
    }

    async fn write_page_once(&mut self, page: u8, data: &Page) -> Result<(), DistoError> {
        self.channel
            .request_with_payload(Opcode::BootloaderWrite, u16::from(page), data)
            .await?;
        Ok(())
    }

    async fn recover(
        &mut self,
        what: &str,
        page: u8,
        attempt: usize,
        err: DistoError,
    ) -> Result<DistoError, DistoError> {
        if !err.is_retryable() {
            return Err(err);
        }
        warn!("{} page {:#04x} attempt {}/{} failed: {}", what, page, attempt, self.attempts, err);
        self.channel.drain(DRAIN_QUIET).await?;
        Ok(err)
    }

    /// Reads one page. A timeout or short frame restarts the whole page.
    pub async fn read_page(&mut self, page: u8) -> Result<Page, DistoError> {
        let mut last_err = None;
        for attempt in 1..=self.attempts {
            match self.read_page_once(page).await {
                Ok(data) => {
                    debug!("Read page {:#04x}", page);
                    return Ok(data);
                }
                Err(e) => last_err = Some(self.recover("Reading", page, attempt, e).await?),
            }
        }
        Err(last_err.unwrap_or(DistoError::NoReply(self.channel.read_timeout())))
    }

    /// Writes one page, protected or not.
    pub async fn write_page(&mut self, page: u8, data: &Page) -> Result<(), DistoError> {
        let mut last_err = None;
        for attempt in 1..=self.attempts {
            match self.write_page_once(page, data).await {
                Ok(()) => {
                    debug!("Wrote page {:#04x}", page);
                    return Ok(());
                }
                Err(e) => last_err = Some(self.recover("Writing", page, attempt, e).await?),
            }
        }
        Err(last_err.unwrap_or(DistoError::NoReply(self.channel.read_timeout())))
    }

    /// Reads a contiguous run of pages into one buffer.
    pub async fn read_pages(&mut self, pages: Range<usize>) -> Result<Vec<u8>, DistoError> {
        if pages.end > PAGE_COUNT {
            return Err(DistoError::PageOutOfRange(pages.end));
        }
        let mut image = Vec::with_capacity(pages.len() * PAGE_SIZE);
        for page in pages {
            image.extend_from_slice(&self.read_page(page_number(page)?).await?);
        }
        Ok(image)
    }

    /// Firmware area `0..end_page`.
    pub async fn firmware_read(&mut self, end_page: usize) -> Result<Vec<u8>, DistoError> {
        info!("Reading firmware pages 0..{:#04x}", end_page);
        self.read_pages(0..end_page).await
    }

    /// Every page of flash.
    pub async fn dump(&mut self) -> Result<Vec<u8>, DistoError> {
        info!("Dumping all {} pages", PAGE_COUNT);
        self.read_pages(0..PAGE_COUNT).await
    }

    /// Loads an image, skipping the bootloader-protected pages. The last
    /// page is zero-padded. Returns the number of pages written.
    pub async fn firmware_write(&mut self, image: &[u8]) -> Result<usize, DistoError> {
        let pages = firmware_pages(image.len())?;
        info!("Writing firmware pages {:#04x}..{:#04x}", pages.start, pages.end);

        let mut written = 0;
        for page in pages {
            let start = page * PAGE_SIZE;
            let end = (start + PAGE_SIZE).min(image.len());
            let mut data = [0u8; PAGE_SIZE];
            data[..end - start].copy_from_slice(&image[start..end]);
            self.write_page(page_number(page)?, &data).await?;
            written += 1;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_page_rounds_up() {
        assert_eq!(end_page(0).unwrap(), 0);
        assert_eq!(end_page(1).unwrap(), 1);
        assert_eq!(end_page(256).unwrap(), 1);
        assert_eq!(end_page(257).unwrap(), 2);
        assert_eq!(end_page(65536).unwrap(), 256);
        assert!(matches!(end_page(65537), Err(DistoError::PageOutOfRange(257))));
    }

    #[test]
    fn firmware_skips_protected_pages() {
        assert_eq!(firmware_pages(0x4000).unwrap(), 8..0x40);
        assert!(firmware_pages(0x700).unwrap().is_empty());
    }
}
