use super::*;
use std::collections::VecDeque;
use std::vec::Vec;

#[derive(Default)]
struct Link {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

impl Link {
    fn with_input(bytes: &[u8]) -> Self {
        Self {
            rx: bytes.iter().copied().collect(),
            tx: Vec::new(),
        }
    }
}

impl Transport for Link {
    fn send_byte(&mut self, byte: u8) {
        self.tx.push(byte);
    }

    fn receive_byte(&mut self) -> u8 {
        self.rx.pop_front().expect("test input exhausted")
    }

    fn receive_byte_timeout(&mut self, _timeout_ms: u16) -> Option<u8> {
        self.rx.pop_front()
    }
}

struct Flash {
    bytes: Vec<u8>,
    writes: Vec<(u32, Vec<u8>)>,
    fail: bool,
}

impl Flash {
    fn new() -> Self {
        Self {
            bytes: (0..=255u8).cycle().take(0x400).collect(),
            writes: Vec::new(),
            fail: false,
        }
    }
}

impl FlashTarget for Flash {
    type Error = ();

    fn read_flash(&mut self, byte_addr: u32) -> u8 {
        self.bytes[byte_addr as usize]
    }

    fn write_flash(&mut self, byte_addr: u32, data: &[u8]) -> Result<(), ()> {
        if self.fail {
            return Err(());
        }
        self.writes.push((byte_addr, data.to_vec()));
        Ok(())
    }
}

fn run(input: &[u8], flash: &mut Flash) -> (Vec<u8>, Session) {
    let mut link = Link::with_input(input);
    let mut session = Session::new();
    while !link.rx.is_empty() {
        if session.poll(&mut link, flash) == Poll::Exit {
            break;
        }
    }
    (link.tx, session)
}

#[test]
fn identify_returns_identifier() {
    let (tx, _) = run(b"S", &mut Flash::new());
    assert_eq!(tx, b"AVRBOOT");
}

#[test]
fn set_address_is_word_addressed() {
    let (tx, session) = run(&[b'A', 0x01, 0x80], &mut Flash::new());
    assert_eq!(tx, [ACK]);
    assert_eq!(session.byte_address(), 0x300);
}

#[test]
fn block_read_streams_flash_and_advances() {
    let mut flash = Flash::new();
    let (tx, session) = run(&[b'A', 0x00, 0x08, b'g', 0x00, 0x04, b'F'], &mut flash);
    assert_eq!(tx, [ACK, 0x10, 0x11, 0x12, 0x13]);
    assert_eq!(session.byte_address(), 0x14);
}

#[test]
fn block_read_of_other_memory_is_refused() {
    let (tx, session) = run(&[b'g', 0x00, 0x02, b'E'], &mut Flash::new());
    assert_eq!(tx, [NACK]);
    assert_eq!(session.byte_address(), 0);
}

#[test]
fn block_load_writes_flash_block() {
    let mut flash = Flash::new();
    let (tx, session) = run(&[b'A', 0xFC, 0x00, b'B', 0x00, 0x03, b'F', 1, 2, 3], &mut flash);
    assert_eq!(tx, [ACK, ACK]);
    assert_eq!(flash.writes, [(0x1_F800, std::vec![1, 2, 3])]);
    // Odd sizes round up to the next word.
    assert_eq!(session.byte_address(), 0x1_F804);
}

#[test]
fn block_load_failure_is_nacked_and_keeps_address() {
    let mut flash = Flash::new();
    flash.fail = true;
    let (tx, session) = run(&[b'B', 0x00, 0x02, b'F', 0xAA, 0x55], &mut flash);
    assert_eq!(tx, [NACK]);
    assert_eq!(session.byte_address(), 0);
}

#[test]
fn oversized_block_is_drained_and_refused() {
    let mut input = std::vec![b'B', 0x01, 0x01, b'F'];
    input.extend(std::iter::repeat(0x5A).take(0x101));
    input.push(b'S');
    let mut flash = Flash::new();
    let (tx, _) = run(&input, &mut flash);
    assert!(flash.writes.is_empty());
    assert_eq!(tx[0], NACK);
    // The next command is parsed normally, so the payload was consumed.
    assert_eq!(&tx[1..], b"AVRBOOT");
}

#[test]
fn block_load_of_other_memory_drains_payload() {
    let mut flash = Flash::new();
    let (tx, _) = run(&[b'B', 0x00, 0x02, b'E', 0x01, 0x02, b'a'], &mut flash);
    assert!(flash.writes.is_empty());
    assert_eq!(tx, [NACK, YES]);
}

#[test]
fn block_support_reports_page_size() {
    let (tx, _) = run(b"b", &mut Flash::new());
    assert_eq!(tx, [YES, 0x01, 0x00]);
}

#[test]
fn unknown_command_and_exit() {
    let mut link = Link::with_input(b"xE");
    let mut session = Session::new();
    let mut flash = Flash::new();
    assert_eq!(session.poll(&mut link, &mut flash), Poll::Continue);
    assert_eq!(session.poll(&mut link, &mut flash), Poll::Exit);
    assert_eq!(link.tx, [NACK, ACK]);
}

#[test]
fn send_line_appends_crlf() {
    let mut link = Link::default();
    link.send_line("AVRBCE9");
    assert_eq!(link.tx, b"AVRBCE9\r\n");
}
