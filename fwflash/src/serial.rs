//! Serial implementation of the device link.
//!
//! Frames on the wire are `BE EF | opcode | len | payload`. A dedicated
//! reader thread deframes incoming bytes and dispatches each payload to
//! the callbacks registered for its opcode.

use fwflash_lib::{Callback, Error, Link, Result};
use serialport::SerialPort;
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const PREAMBLE: [u8; 2] = [0xBE, 0xEF];

type CallbackMap = Arc<Mutex<HashMap<u8, Vec<Callback>>>>;

pub struct SerialLink {
    port: Mutex<Box<dyn SerialPort>>,
    callbacks: CallbackMap,
}

impl SerialLink {
    pub fn open(port_name: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud)
            // Poll granularity for the reader thread, not a protocol
            // timeout.
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|err| Error::link(format!("failed to open {port_name}: {err}")))?;
        let reader = port
            .try_clone()
            .map_err(|err| Error::link(format!("failed to clone {port_name}: {err}")))?;

        let callbacks: CallbackMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_callbacks = Arc::clone(&callbacks);
        thread::spawn(move || reader_loop(reader, reader_callbacks));

        Ok(Self {
            port: Mutex::new(port),
            callbacks,
        })
    }
}

impl Link for SerialLink {
    fn send(&self, opcode: u8, payload: &[u8]) -> Result<()> {
        let len = u8::try_from(payload.len()).map_err(|_| {
            Error::link(format!("payload of {} bytes does not fit a frame", payload.len()))
        })?;
        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(&PREAMBLE);
        frame.push(opcode);
        frame.push(len);
        frame.extend_from_slice(payload);

        let mut port = self.port.lock().unwrap();
        port.write_all(&frame)
            .and_then(|_| port.flush())
            .map_err(|err| Error::link(format!("serial write failed: {err}")))
    }

    fn register_callback(&self, opcode: u8, callback: Callback) {
        self.callbacks
            .lock()
            .unwrap()
            .entry(opcode)
            .or_default()
            .push(callback);
    }
}

fn reader_loop(mut port: Box<dyn SerialPort>, callbacks: CallbackMap) {
    loop {
        if sync_preamble(&mut port).is_none() {
            tracing::debug!("serial reader exiting");
            return;
        }
        let mut header = [0u8; 2];
        if fill(&mut port, &mut header).is_none() {
            return;
        }
        let opcode = header[0];
        let mut payload = vec![0u8; header[1] as usize];
        if fill(&mut port, &mut payload).is_none() {
            return;
        }

        let handlers = callbacks.lock().unwrap().get(&opcode).cloned();
        match handlers {
            Some(handlers) => {
                for handler in &handlers {
                    handler(&payload);
                }
            }
            None => tracing::debug!(opcode, "no callback registered for message"),
        }
    }
}

/// Consumes bytes until a full preamble is seen. Returns None when the
/// port is gone.
fn sync_preamble(port: &mut Box<dyn SerialPort>) -> Option<()> {
    loop {
        let mut byte = read_byte(port)?;
        loop {
            if byte != PREAMBLE[0] {
                break;
            }
            let next = read_byte(port)?;
            if next == PREAMBLE[1] {
                return Some(());
            }
            byte = next;
        }
    }
}

fn fill(port: &mut Box<dyn SerialPort>, buf: &mut [u8]) -> Option<()> {
    for slot in buf.iter_mut() {
        *slot = read_byte(port)?;
    }
    Some(())
}

fn read_byte(port: &mut Box<dyn SerialPort>) -> Option<u8> {
    let mut byte = [0u8; 1];
    loop {
        match port.read(&mut byte) {
            Ok(1) => return Some(byte[0]),
            Ok(_) => continue,
            Err(err) if err.kind() == ErrorKind::TimedOut => continue,
            Err(err) => {
                tracing::warn!(%err, "serial read failed");
                return None;
            }
        }
    }
}
