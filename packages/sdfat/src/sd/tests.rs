use core::convert::Infallible;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use super::{decode_capacity_bytes, SdCardVersion, SdError, SdSpiDevice};
use crate::blockdev::{BlockDevice, SECTOR_SIZE};

fn set_bits(csd: &mut [u8; 16], msb: u8, lsb: u8, value: u32) {
    let mut v = value;
    for bit in lsb..=msb {
        let byte_idx = (127 - bit) / 8;
        let bit_in_byte = bit % 8;
        if v & 1 != 0 {
            csd[byte_idx as usize] |= 1 << bit_in_byte;
        }
        v >>= 1;
    }
}

/// CSD 2.0 with C_SIZE 15: sixteen half-megabyte units, 8 MiB.
fn csd_v2() -> [u8; 16] {
    let mut csd = [0u8; 16];
    set_bits(&mut csd, 127, 126, 1);
    set_bits(&mut csd, 69, 48, 15);
    csd
}

/// CSD 1.0: 512-byte blocks, C_SIZE 100, mult x32 -> 101 * 32 * 512 bytes.
fn csd_v1() -> [u8; 16] {
    let mut csd = [0u8; 16];
    set_bits(&mut csd, 83, 80, 9);
    set_bits(&mut csd, 73, 62, 100);
    set_bits(&mut csd, 49, 47, 3);
    csd
}

/// Byte counter for a CMD24 data packet: token seen, then 512 data plus
/// two CRC bytes.
struct WritePhase {
    token_seen: bool,
    remaining: usize,
}

/// One SD card on the far side of the bus. Watches the MOSI byte stream
/// for 6-byte command frames and queues each command's canned reply, so
/// the driver's own polling consumes responses at the positions the real
/// protocol puts them.
struct CardState {
    replies: VecDeque<u8>,
    frame: Vec<u8>,
    commands: Vec<(u8, u32)>,
    cmd8_r1: u8,
    cmd8_echo: [u8; 4],
    acmd41_busy_polls: u32,
    ocr_first: u8,
    csd: [u8; 16],
    sector: [u8; SECTOR_SIZE],
    write_phase: Option<WritePhase>,
    written: Vec<u8>,
}

impl CardState {
    fn clock(&mut self, mosi: u8) -> u8 {
        let miso = self.replies.pop_front().unwrap_or(0xFF);
        if let Some(phase) = self.write_phase.as_mut() {
            if !phase.token_seen {
                if mosi == 0xFE {
                    phase.token_seen = true;
                }
            } else {
                if phase.remaining > 2 {
                    self.written.push(mosi);
                }
                phase.remaining -= 1;
                if phase.remaining == 0 {
                    self.write_phase = None;
                    // Data accepted, no busy stretch.
                    self.replies.push_back(0x05);
                }
            }
            return miso;
        }

        if self.frame.is_empty() {
            if mosi & 0xC0 == 0x40 {
                self.frame.push(mosi);
            }
        } else {
            self.frame.push(mosi);
            if self.frame.len() == 6 {
                let cmd = self.frame[0] & 0x3F;
                let arg = u32::from_be_bytes([
                    self.frame[1],
                    self.frame[2],
                    self.frame[3],
                    self.frame[4],
                ]);
                self.frame.clear();
                self.commands.push((cmd, arg));
                self.respond(cmd);
            }
        }
        miso
    }

    fn respond(&mut self, cmd: u8) {
        match cmd {
            0 | 55 => self.replies.push_back(0x01),
            8 => {
                self.replies.push_back(self.cmd8_r1);
                self.replies.extend(self.cmd8_echo);
            }
            41 => {
                if self.acmd41_busy_polls > 0 {
                    self.acmd41_busy_polls -= 1;
                    self.replies.push_back(0x01);
                } else {
                    self.replies.push_back(0x00);
                }
            }
            58 => {
                self.replies.push_back(0x00);
                self.replies
                    .extend([self.ocr_first, 0x00, 0x00, 0x00]);
            }
            9 => {
                self.replies.push_back(0x00);
                self.replies.extend([0xFF, 0xFE]);
                self.replies.extend(self.csd);
                self.replies.extend([0x00, 0x00]);
            }
            17 => {
                self.replies.push_back(0x00);
                self.replies.extend([0xFF, 0xFE]);
                self.replies.extend(self.sector);
                self.replies.extend([0x00, 0x00]);
            }
            24 => {
                self.replies.push_back(0x00);
                self.write_phase = Some(WritePhase {
                    token_seen: false,
                    remaining: SECTOR_SIZE + 2,
                });
            }
            _ => self.replies.push_back(0x00),
        }
    }
}

type Card = Rc<RefCell<CardState>>;

fn card_v2() -> Card {
    Rc::new(RefCell::new(CardState {
        replies: VecDeque::new(),
        frame: Vec::new(),
        commands: Vec::new(),
        cmd8_r1: 0x01,
        cmd8_echo: [0x00, 0x00, 0x01, 0xAA],
        acmd41_busy_polls: 2,
        ocr_first: 0x40,
        csd: csd_v2(),
        sector: [0; SECTOR_SIZE],
        write_phase: None,
        written: Vec::new(),
    }))
}

fn card_v1() -> Card {
    let card = card_v2();
    {
        let mut state = card.borrow_mut();
        // Illegal-command R1: the card predates CMD8.
        state.cmd8_r1 = 0x05;
        state.cmd8_echo = [0xFF; 4];
        state.ocr_first = 0x00;
        state.csd = csd_v1();
    }
    card
}

struct CardBus {
    card: Card,
}

impl embedded_hal::spi::ErrorType for CardBus {
    type Error = Infallible;
}

impl SpiBus<u8> for CardBus {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        for word in words.iter_mut() {
            *word = self.card.borrow_mut().clock(0xFF);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Infallible> {
        for &word in words {
            self.card.borrow_mut().clock(word);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Infallible> {
        self.write(write)?;
        self.read(read)
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        for word in words.iter_mut() {
            *word = self.card.borrow_mut().clock(*word);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

struct NoopPin;

impl embedded_hal::digital::ErrorType for NoopPin {
    type Error = Infallible;
}

impl OutputPin for NoopPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

fn device(card: &Card) -> SdSpiDevice<CardBus, NoopPin, NoDelay> {
    let bus = CardBus {
        card: Rc::clone(card),
    };
    match SdSpiDevice::new(bus, NoopPin, NoDelay) {
        Ok(dev) => dev,
        Err(err) => panic!("device construction failed: {:?}", err),
    }
}

#[test]
fn init_v2_sdhc_completes_the_ladder() {
    let card = card_v2();
    let mut dev = device(&card);
    let status = dev.init().unwrap();
    assert_eq!(status.version, SdCardVersion::V2);
    assert!(status.high_capacity);
    assert_eq!(status.capacity_bytes, 16 * 512 * 1024);
    assert!(dev.is_initialized());
    assert_eq!(dev.sector_count().unwrap(), 16 * 1024);

    let commands = card.borrow().commands.clone();
    assert_eq!(commands[0], (0, 0));
    assert_eq!(commands[1], (8, 0x0000_01AA));
    // Two busy rounds before ready, each its own CMD55/ACMD41 pair with
    // the HCS bit set.
    assert_eq!(commands[2], (55, 0));
    assert_eq!(commands[3], (41, 0x4000_0000));
    assert_eq!(commands[7], (41, 0x4000_0000));
    // Block length is fixed at 512 for V2; no CMD16 on this path.
    assert!(commands.iter().all(|&(cmd, _)| cmd != 16));
    assert_eq!(commands[8], (58, 0));
    assert_eq!(commands[9], (9, 0));
    assert_eq!(commands.len(), 10);
}

#[test]
fn init_rejects_cmd8_echo_mismatch() {
    let card = card_v2();
    card.borrow_mut().cmd8_echo = [0x00, 0x00, 0x01, 0x55];
    let mut dev = device(&card);
    match dev.init() {
        Err(SdError::Cmd8EchoMismatch(echo)) => assert_eq!(echo, [0x00, 0x00, 0x01, 0x55]),
        Ok(status) => panic!("expected echo mismatch, initialized {:?}", status),
        Err(other) => panic!("unexpected error: {:?}", other),
    }
    assert!(!dev.is_initialized());
}

#[test]
fn init_times_out_when_acmd41_never_readies() {
    let card = card_v2();
    card.borrow_mut().acmd41_busy_polls = u32::MAX;
    let mut dev = device(&card);
    match dev.init() {
        Err(SdError::Acmd41Timeout(r1)) => assert_eq!(r1, 0x01),
        Ok(status) => panic!("expected a timeout, initialized {:?}", status),
        Err(other) => panic!("unexpected error: {:?}", other),
    }
    // The full retry budget was spent.
    let acmd41s = card
        .borrow()
        .commands
        .iter()
        .filter(|&&(cmd, _)| cmd == 41)
        .count();
    assert_eq!(acmd41s, 200);
}

#[test]
fn sdsc_init_sets_block_length_and_scales_read_addresses() {
    let card = card_v1();
    for (index, byte) in card.borrow_mut().sector.iter_mut().enumerate() {
        *byte = (index % 251) as u8;
    }
    let mut dev = device(&card);
    let status = dev.init().unwrap();
    assert_eq!(status.version, SdCardVersion::V1);
    assert!(!status.high_capacity);
    assert_eq!(status.capacity_bytes, 101 * 32 * 512);

    let commands = card.borrow().commands.clone();
    assert!(commands.contains(&(16, SECTOR_SIZE as u32)));
    // Standard-capacity ACMD41 leaves the HCS bit clear.
    assert!(commands.contains(&(41, 0)));

    let mut out = [0u8; SECTOR_SIZE];
    dev.read_sector(3, &mut out).unwrap();
    assert_eq!(out[..], card.borrow().sector[..]);
    // Byte addressing: CMD17 carries lba * 512.
    assert!(card.borrow().commands.contains(&(17, 3 * 512)));

    // Same sector again comes from the cache, no second CMD17.
    let issued = card.borrow().commands.len();
    dev.read_sector(3, &mut out).unwrap();
    assert_eq!(card.borrow().commands.len(), issued);
}

#[test]
fn sdhc_read_and_write_use_block_addresses() {
    let card = card_v2();
    let mut dev = device(&card);
    dev.init().unwrap();

    let mut data = [0u8; SECTOR_SIZE];
    for (index, byte) in data.iter_mut().enumerate() {
        *byte = (0x80 + index % 97) as u8;
    }
    dev.write_sector(5, &data).unwrap();
    assert!(card.borrow().commands.contains(&(24, 5)));
    assert_eq!(card.borrow().written[..], data[..]);

    // The write refreshed the cache, so reading it back issues no CMD17.
    let mut out = [0u8; SECTOR_SIZE];
    dev.read_sector(5, &mut out).unwrap();
    assert_eq!(out[..], data[..]);
    assert!(card.borrow().commands.iter().all(|&(cmd, _)| cmd != 17));
}

#[test]
fn sector_io_before_init_is_refused() {
    let card = card_v2();
    let mut dev = device(&card);
    let mut out = [0u8; SECTOR_SIZE];
    match dev.read_sector(0, &mut out) {
        Err(SdError::NotInitialized) => {}
        other => panic!("unexpected read result: {:?}", other),
    }
    match dev.write_sector(0, &out) {
        Err(SdError::NotInitialized) => {}
        other => panic!("unexpected write result: {:?}", other),
    }
    assert!(card.borrow().commands.is_empty());
}

#[test]
fn csd_v2_capacity() {
    assert_eq!(decode_capacity_bytes(&csd_v2()), Some(16 * 512 * 1024));
}

#[test]
fn csd_v1_capacity() {
    assert_eq!(decode_capacity_bytes(&csd_v1()), Some(101 * 32 * 512));
}

#[test]
fn csd_unknown_structure() {
    let mut csd = [0u8; 16];
    set_bits(&mut csd, 127, 126, 2);
    assert_eq!(decode_capacity_bytes(&csd), None);
}
