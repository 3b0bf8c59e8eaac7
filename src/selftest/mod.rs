//! Selftest - the test process channel
//!
//! The controller and the test process talk over a message channel. Before
//! anything else the three handshake strings are exchanged verbatim; a
//! [`TestConnection`] only exists once that succeeded, so no test payload can
//! be sent or received on a half-open channel.

#[cfg(target_os = "windows")]
pub mod pipe;

use std::io;
use std::path::PathBuf;
use std::process::{Child, Command};
use thiserror::Error;

/// Client -> server, first leg
pub const CLIENT_HELLO: &str = "Hey there, Are you HyperDbg?";
/// Server -> client, second leg
pub const SERVER_HELLO: &str = "Hello, Dear Test Process... Yes, I'm HyperDbg Debugger :)";
/// Client -> server, third leg
pub const CLIENT_REQUEST: &str = "Wow! I miss you... Would you plz send test cases?";

pub const TEST_PIPE_NAME: &str = r"\\.\Pipe\HyperDbgTests";
pub const TEST_PROCESS_NAME: &str = "hyperdbg-test.exe";
pub const TEST_PROCESS_ARGUMENT: &str = "im-hyperdbg";

/// Largest message on any leg, in bytes
pub const MAX_MESSAGE_SIZE: usize = 0x1000;

#[derive(Error, Debug)]
pub enum TestChannelError {
    #[error("test channel i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("nothing was received while waiting for {expected:?}")]
    EmptyRead { expected: &'static str },

    #[error("could not handshake with the test process, expected {expected:?} but got {received:?}")]
    UnexpectedMessage {
        expected: &'static str,
        received: String,
    },

    #[error("message of {size} bytes exceeds the {max:#x} byte limit")]
    MessageTooLarge { size: usize, max: usize },

    #[error("{} is not found next to the controller ({path})", TEST_PROCESS_NAME)]
    TestProcessNotFound { path: PathBuf },
}

/// Byte-oriented duplex channel, one message per call
pub trait MessageChannel {
    fn send(&mut self, message: &[u8]) -> io::Result<()>;

    /// Receive one message into `buffer`; returns its length
    fn receive(&mut self, buffer: &mut [u8]) -> io::Result<usize>;
}

/// A channel that completed the handshake
#[derive(Debug)]
pub struct TestConnection<C: MessageChannel> {
    channel: C,
}

impl<C: MessageChannel> TestConnection<C> {
    pub fn send_payload(&mut self, payload: &[u8]) -> Result<(), TestChannelError> {
        check_size(payload.len())?;
        self.channel.send(payload)?;
        Ok(())
    }

    pub fn receive_payload(&mut self) -> Result<Vec<u8>, TestChannelError> {
        let mut buffer = vec![0u8; MAX_MESSAGE_SIZE];
        let size = self.channel.receive(&mut buffer)?;
        check_size(size)?;
        buffer.truncate(size);
        Ok(buffer)
    }

    pub fn into_inner(self) -> C {
        self.channel
    }
}

fn check_size(size: usize) -> Result<(), TestChannelError> {
    if size > MAX_MESSAGE_SIZE {
        return Err(TestChannelError::MessageTooLarge {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}

/// Send a handshake string with its terminating NUL
fn send_text<C: MessageChannel>(channel: &mut C, text: &'static str) -> Result<(), TestChannelError> {
    let mut message = Vec::with_capacity(text.len() + 1);
    message.extend_from_slice(text.as_bytes());
    message.push(0);
    check_size(message.len())?;
    channel.send(&message)?;
    Ok(())
}

/// Receive one message and require it to be exactly `expected` (one trailing NUL allowed)
fn expect_text<C: MessageChannel>(channel: &mut C, expected: &'static str) -> Result<(), TestChannelError> {
    let mut buffer = vec![0u8; MAX_MESSAGE_SIZE];
    let size = channel.receive(&mut buffer)?;
    if size == 0 {
        return Err(TestChannelError::EmptyRead { expected });
    }
    check_size(size)?;

    let received = &buffer[..size];
    let text = received.strip_suffix(&[0u8]).unwrap_or(received);
    if text != expected.as_bytes() {
        return Err(TestChannelError::UnexpectedMessage {
            expected,
            received: String::from_utf8_lossy(text).into_owned(),
        });
    }
    Ok(())
}

/// Controller side: hello in, hello out, request in
pub fn server_handshake<C: MessageChannel>(mut channel: C) -> Result<TestConnection<C>, TestChannelError> {
    expect_text(&mut channel, CLIENT_HELLO)?;
    send_text(&mut channel, SERVER_HELLO)?;
    expect_text(&mut channel, CLIENT_REQUEST)?;
    log::info!("test process connected");
    Ok(TestConnection { channel })
}

/// Test process side of the same exchange
pub fn client_handshake<C: MessageChannel>(mut channel: C) -> Result<TestConnection<C>, TestChannelError> {
    send_text(&mut channel, CLIENT_HELLO)?;
    expect_text(&mut channel, SERVER_HELLO)?;
    send_text(&mut channel, CLIENT_REQUEST)?;
    Ok(TestConnection { channel })
}

/// Path of the test process, expected next to the running executable
pub fn locate_test_process() -> Result<PathBuf, TestChannelError> {
    let exe = std::env::current_exe()?;
    let path = exe
        .parent()
        .map(|dir| dir.join(TEST_PROCESS_NAME))
        .unwrap_or_else(|| PathBuf::from(TEST_PROCESS_NAME));

    if !path.is_file() {
        return Err(TestChannelError::TestProcessNotFound { path });
    }
    Ok(path)
}

/// Start the test process with `args`
pub fn open_test_process(args: &[&str]) -> Result<Child, TestChannelError> {
    let path = locate_test_process()?;
    log::debug!("starting {} {:?}", path.display(), args);
    Ok(Command::new(path).args(args).spawn()?)
}
