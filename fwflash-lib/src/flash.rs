//! The flashing engine: blocking erase/write/read operations over the
//! asynchronous link, and the image programming algorithm on top of them.

use crate::image::{AddressRange, SourceImage, address_ranges};
use crate::link::Link;
use crate::progress::{ProgressCallback, ProgressKind};
use crate::{DeviceFamily, Error, Opcodes, Result};
use std::collections::BTreeSet;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Bytes written and verified per wire operation.
pub const CHUNK_SIZE: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Erase,
    Write,
    Read,
}

/// The one operation currently awaiting its completion message.
struct Pending {
    kind: OpKind,
    complete: mpsc::SyncSender<Completion>,
}

enum Completion {
    Done,
    ReadData(Vec<u8>),
    Failed(Error),
}

/// Outcome of a successful programming session.
#[derive(Debug, Clone)]
pub struct ProgramStats {
    pub sectors_erased: Vec<u32>,
    pub bytes_written: u64,
    pub elapsed: Duration,
}

/// Flashing engine bound to one device family on one link.
///
/// Operations are strictly sequential: exactly one request may be in
/// flight, and every call blocks until the matching completion arrives
/// from the link. Issuing a second operation while one is pending fails
/// with [`Error::OperationInFlight`] instead of corrupting the rendezvous
/// state; callers sharing an engine across threads must serialize access
/// themselves.
pub struct Flash<L: Link> {
    link: L,
    family: DeviceFamily,
    opcodes: Opcodes,
    pending: Arc<Mutex<Option<Pending>>>,
    timeout: Option<Duration>,
}

impl<L: Link> Flash<L> {
    /// Binds the engine to `link` and registers the family's completion
    /// callbacks.
    pub fn new(link: L, family: DeviceFamily) -> Self {
        let opcodes = family.opcodes();
        let pending: Arc<Mutex<Option<Pending>>> = Arc::new(Mutex::new(None));

        // Erase and write completions share the done opcode; the payload
        // carries nothing, arrival alone completes the operation.
        let done_pending = Arc::clone(&pending);
        link.register_callback(
            opcodes.done,
            Arc::new(move |_payload: &[u8]| {
                let mut slot = done_pending.lock().unwrap();
                match slot.take() {
                    Some(pend) if pend.kind != OpKind::Read => {
                        let _ = pend.complete.send(Completion::Done);
                    }
                    Some(pend) => {
                        *slot = Some(pend);
                        warn!("done message received while a read is pending");
                    }
                    None => warn!("unsolicited done message"),
                }
            }),
        );

        let read_pending = Arc::clone(&pending);
        link.register_callback(
            opcodes.read,
            Arc::new(move |payload: &[u8]| {
                let mut slot = read_pending.lock().unwrap();
                match slot.take() {
                    Some(pend) if pend.kind == OpKind::Read => {
                        let completion = match decode_read_response(payload) {
                            Ok(data) => Completion::ReadData(data),
                            Err(err) => Completion::Failed(err),
                        };
                        let _ = pend.complete.send(completion);
                    }
                    Some(pend) => {
                        *slot = Some(pend);
                        warn!("read-data message received while no read is pending");
                    }
                    None => warn!("unsolicited read-data message"),
                }
            }),
        );

        Self {
            link,
            family,
            opcodes,
            pending,
            timeout: None,
        }
    }

    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    /// Bounds how long each operation waits for its completion. The wire
    /// protocol itself has no timeout; without one a silent device blocks
    /// the caller forever.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Sorted, deduplicated union of the sectors spanned by `ranges`,
    /// including the sectors of both range endpoints.
    pub fn sectors_used(&self, ranges: &[AddressRange]) -> Result<Vec<u32>> {
        let mut sectors = BTreeSet::new();
        for range in ranges {
            if range.is_empty() {
                continue;
            }
            let first = self.family.address_to_sector(range.start)?;
            let last = self.family.address_to_sector(range.end - 1)?;
            sectors.extend(first..=last);
        }
        Ok(sectors.into_iter().collect())
    }

    /// Erases one sector.
    ///
    /// `check` enforces the family's restriction policy; every
    /// engine-internal caller passes true. Bypassing the check is reserved
    /// for recovery tooling and is logged loudly.
    pub fn erase_sector(&self, sector: u32, check: bool) -> Result<()> {
        if self.family.is_restricted(sector) {
            if check {
                return Err(Error::PolicyViolation { sector });
            }
            warn!(sector, "erasing restricted sector, policy check bypassed");
        }
        let index = u8::try_from(sector)
            .map_err(|_| Error::protocol(format!("sector {sector} does not fit the wire encoding")))?;
        debug!(sector, "erase");
        match self.transact(OpKind::Erase, self.opcodes.erase, &[index])? {
            Completion::Done => Ok(()),
            Completion::Failed(err) => Err(err),
            Completion::ReadData(_) => Err(Error::protocol("read data answered an erase request")),
        }
    }

    /// Writes `data` at `address` in one wire operation (at most 255
    /// bytes).
    pub fn write(&self, address: u32, data: &[u8]) -> Result<()> {
        let len = u8::try_from(data.len()).map_err(|_| {
            Error::protocol(format!(
                "write of {} bytes exceeds one wire operation",
                data.len()
            ))
        })?;
        let mut request = Vec::with_capacity(5 + data.len());
        request.extend_from_slice(&address.to_le_bytes());
        request.push(len);
        request.extend_from_slice(data);
        trace!("write {len} bytes at {address:#010X}");
        match self.transact(OpKind::Write, self.opcodes.write, &request)? {
            Completion::Done => Ok(()),
            Completion::Failed(err) => Err(err),
            Completion::ReadData(_) => Err(Error::protocol("read data answered a write request")),
        }
    }

    /// Reads `len` bytes starting at `address`.
    pub fn read(&self, address: u32, len: u8) -> Result<Vec<u8>> {
        let mut request = [0u8; 5];
        request[..4].copy_from_slice(&address.to_le_bytes());
        request[4] = len;
        trace!("read {len} bytes at {address:#010X}");
        match self.transact(OpKind::Read, self.opcodes.read, &request)? {
            Completion::ReadData(data) => Ok(data),
            Completion::Failed(err) => Err(err),
            Completion::Done => Err(Error::protocol("done message answered a read request")),
        }
    }

    /// Programs `image` onto the device: erase every touched sector once,
    /// then write and verify the image in [`CHUNK_SIZE`] strides.
    ///
    /// A restricted sector anywhere in the plan aborts the session with
    /// [`Error::PolicyViolation`] before that sector's erase is sent.
    /// Sectors erased earlier in the sequence stay erased; partial erasure
    /// is a real exit state the caller has to deal with, not something the
    /// engine hides.
    pub fn write_image(
        &self,
        image: &dyn SourceImage,
        progress: &dyn ProgressCallback,
    ) -> Result<ProgramStats> {
        let ranges = address_ranges(image);
        let sectors = self.sectors_used(&ranges)?;

        let erase_bar = progress.start(
            ProgressKind::Bar {
                total: sectors.len() as u64,
            },
            "Erasing sectors".into(),
        );
        for &sector in &sectors {
            progress.update_message(erase_bar, format!("Erasing sector {sector}"));
            if let Err(err) = self.erase_sector(sector, true) {
                progress.finish(erase_bar, "Aborted".into());
                return Err(err);
            }
            progress.increment(erase_bar, 1);
        }
        progress.finish(erase_bar, format!("Erased {} sectors", sectors.len()));
        info!(sectors = sectors.len(), "erase phase complete");

        let total_bytes: u64 = ranges.iter().map(|range| u64::from(range.len())).sum();
        let bar = progress.start(ProgressKind::Bar { total: total_bytes }, "Programming".into());
        let started = Instant::now();
        let mut bytes_written = 0u64;
        for range in &ranges {
            let mut addr = range.start;
            while addr < range.end {
                progress.update_message(bar, format!("Programming flash at {addr:#010X}"));
                // Always a full chunk, even when the range ends mid-stride;
                // the image pads past its populated end.
                let chunk = image.read_bytes(addr, CHUNK_SIZE);
                if let Err(err) = self.program_chunk(addr, &chunk) {
                    progress.finish(bar, "Aborted".into());
                    return Err(err);
                }
                let stride = (range.end - addr).min(CHUNK_SIZE as u32);
                bytes_written += u64::from(stride);
                progress.increment(bar, u64::from(stride));
                addr += stride;
            }
        }
        let elapsed = started.elapsed();
        progress.finish(
            bar,
            format!("Programmed {bytes_written} bytes in {elapsed:.1?}"),
        );
        info!(bytes = bytes_written, ?elapsed, "programming complete");

        Ok(ProgramStats {
            sectors_erased: sectors,
            bytes_written,
            elapsed,
        })
    }

    /// Writes one chunk and immediately reads it back; a mismatch aborts
    /// the session, no retry.
    fn program_chunk(&self, address: u32, chunk: &[u8]) -> Result<()> {
        self.write(address, chunk)?;
        let readback = self.read(address, chunk.len() as u8)?;
        if readback != chunk {
            return Err(Error::VerificationError {
                address,
                expected: chunk.to_vec(),
                actual: readback,
            });
        }
        Ok(())
    }

    /// Sends one request and blocks until its completion callback fires.
    ///
    /// The pending slot is the in-flight guard: it is claimed before the
    /// request goes out and released by the completion callback (or on a
    /// send failure or timeout, so the engine stays usable).
    fn transact(&self, kind: OpKind, opcode: u8, request: &[u8]) -> Result<Completion> {
        let (tx, rx) = mpsc::sync_channel(1);
        {
            let mut slot = self.pending.lock().unwrap();
            if slot.is_some() {
                return Err(Error::OperationInFlight);
            }
            *slot = Some(Pending { kind, complete: tx });
        }

        if let Err(err) = self.link.send(opcode, request) {
            self.pending.lock().unwrap().take();
            return Err(err);
        }

        match self.timeout {
            None => rx
                .recv()
                .map_err(|_| Error::link("completion channel closed before a response arrived")),
            Some(limit) => rx.recv_timeout(limit).map_err(|err| match err {
                mpsc::RecvTimeoutError::Timeout => {
                    self.pending.lock().unwrap().take();
                    Error::Timeout(limit)
                }
                mpsc::RecvTimeoutError::Disconnected => {
                    Error::link("completion channel closed before a response arrived")
                }
            }),
        }
    }
}

/// Read responses echo the request header: 4-byte little-endian address,
/// 1-byte length, then that many data bytes. The header is only used for
/// framing.
fn decode_read_response(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() < 5 {
        return Err(Error::protocol(format!(
            "read response too short: {} bytes",
            payload.len()
        )));
    }
    let len = payload[4] as usize;
    let data = &payload[5..];
    if data.len() < len {
        return Err(Error::protocol(format!(
            "read response truncated: header says {len} bytes, got {}",
            data.len()
        )));
    }
    Ok(data[..len].to_vec())
}
