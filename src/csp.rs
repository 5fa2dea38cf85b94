//! The radio's command strobe processor (CSP).
//!
//! The CSP executes a small program of at most 24 instructions, which can wait for backoff
//! periods, sample the channel and issue command strobes on its own. We use it to run CSMA-CA
//! without the CPU having to time backoffs.
//!
//! Programs are represented as a list of [Instruction]s and loaded by writing their encoding to
//! `RFST` while the CSP is stopped. [Sequencer] interprets the same instructions in software, for
//! targets without the hardware.

use heapless::Vec;
use macro_bits::serializable_enum;

use crate::regs::{Reg, Registers};

/// Maximum program length of the CSP.
pub const PROGRAM_CAPACITY: usize = 24;

serializable_enum! {
    /// Immediate command strobes, as written to `RFST`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub enum CspCommand: u8 {
        /// Start executing the program.
        Start => 0xe1,
        /// Stop executing the program.
        Stop => 0xe2,
        RxOn => 0xe3,
        TxOn => 0xe9,
        TxOnCca => 0xea,
        SampleCca => 0xeb,
        FlushRx => 0xed,
        FlushTx => 0xee,
        RfOff => 0xef,
        /// Erase the program memory.
        Clear => 0xff
    }
}
impl CspCommand {
    /// Offset between the immediate form of a strobe and the one used inside programs.
    const PROGRAM_OFFSET: u8 = 0x10;
    const ALL: [Self; 10] = [
        Self::Start,
        Self::Stop,
        Self::RxOn,
        Self::TxOn,
        Self::TxOnCca,
        Self::SampleCca,
        Self::FlushRx,
        Self::FlushTx,
        Self::RfOff,
        Self::Clear,
    ];
}

/// A condition instructions can test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Condition {
    ChannelClear,
    SfdSeen,
    CpuControl,
    EndOfInstruction,
    XIsZero,
    YIsZero,
    ZIsZero,
    RssiValid,
}
impl Condition {
    const fn into_bits(self) -> u8 {
        match self {
            Self::ChannelClear => 0,
            Self::SfdSeen => 1,
            Self::CpuControl => 2,
            Self::EndOfInstruction => 3,
            Self::XIsZero => 4,
            Self::YIsZero => 5,
            Self::ZIsZero => 6,
            Self::RssiValid => 7,
        }
    }
    const fn from_bits(bits: u8) -> Self {
        match bits & 0x7 {
            0 => Self::ChannelClear,
            1 => Self::SfdSeen,
            2 => Self::CpuControl,
            3 => Self::EndOfInstruction,
            4 => Self::XIsZero,
            5 => Self::YIsZero,
            6 => Self::ZIsZero,
            _ => Self::RssiValid,
        }
    }
}

/// A single CSP instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instruction {
    /// Skip `count` instructions if the condition (inverted if `negate`) holds.
    Skip {
        count: u8,
        condition: Condition,
        negate: bool,
    },
    /// Wait for `X` backoff periods.
    WaitX,
    /// Load `X` with a random value below `2^Y`.
    RandXY,
    /// Raise the `CSP_MANINT` interrupt.
    Int,
    /// Set the loop start to the next instruction.
    Label,
    /// Jump to the label, if the condition (inverted if `negate`) holds.
    Repeat { condition: Condition, negate: bool },
    IncZ,
    DecZ,
    /// Increment `Y`, but not beyond the operand.
    IncMaxY(u8),
    /// Issue a command strobe.
    Strobe(CspCommand),
}
impl Instruction {
    pub const fn skip_if(count: u8, condition: Condition) -> Self {
        Self::Skip {
            count,
            condition,
            negate: false,
        }
    }
    pub const fn skip_unless(count: u8, condition: Condition) -> Self {
        Self::Skip {
            count,
            condition,
            negate: true,
        }
    }
    pub const fn encode(self) -> u8 {
        match self {
            Self::Skip {
                count,
                condition,
                negate,
            } => ((count & 0x7) << 4) | ((negate as u8) << 3) | condition.into_bits(),
            Self::WaitX => 0xbc,
            Self::RandXY => 0xbd,
            Self::Int => 0xba,
            Self::Label => 0xbb,
            Self::Repeat { condition, negate } => {
                0xa0 | ((negate as u8) << 3) | condition.into_bits()
            }
            Self::IncZ => 0xc2,
            Self::DecZ => 0xc5,
            Self::IncMaxY(max) => 0xc8 | (max & 0x7),
            Self::Strobe(command) => command.into_bits() - CspCommand::PROGRAM_OFFSET,
        }
    }
    pub fn decode(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00..=0x7f => Self::Skip {
                count: (byte >> 4) & 0x7,
                condition: Condition::from_bits(byte),
                negate: byte & 0x8 != 0,
            },
            0xa0..=0xaf => Self::Repeat {
                condition: Condition::from_bits(byte),
                negate: byte & 0x8 != 0,
            },
            0xba => Self::Int,
            0xbb => Self::Label,
            0xbc => Self::WaitX,
            0xbd => Self::RandXY,
            0xc2 => Self::IncZ,
            0xc5 => Self::DecZ,
            0xc8..=0xcf => Self::IncMaxY(byte & 0x7),
            0xd0..=0xdf => {
                return CspCommand::ALL
                    .into_iter()
                    .find(|command| command.into_bits() == byte + CspCommand::PROGRAM_OFFSET)
                    .map(Self::Strobe)
            }
            _ => return None,
        })
    }
}

/// The CSMA-CA program.
///
/// Expects `Y` to hold the minimum backoff exponent and `Z` the number of retries. Every attempt
/// waits a random number of backoff periods below `2^Y`, then transmits, if no frame is being
/// received and the channel is clear. Otherwise `Y` is incremented up to `max_be`, and the next
/// attempt is made, until `Z` reaches zero, at which point `CSP_MANINT` is raised.
pub const fn csma_program(max_be: u8) -> [Instruction; 13] {
    [
        // The loop decrements Z before testing it, so this makes for one initial attempt plus Z
        // retries.
        Instruction::IncZ,
        Instruction::Label,
        // RANDXY with Y = 0 isn't valid.
        Instruction::skip_if(2, Condition::YIsZero),
        Instruction::RandXY,
        Instruction::WaitX,
        Instruction::IncMaxY(max_be),
        Instruction::skip_if(3, Condition::SfdSeen),
        Instruction::skip_unless(2, Condition::ChannelClear),
        Instruction::Strobe(CspCommand::TxOn),
        Instruction::Strobe(CspCommand::Stop),
        Instruction::DecZ,
        Instruction::Repeat {
            condition: Condition::ZIsZero,
            negate: true,
        },
        Instruction::Int,
    ]
}

/// Stop the CSP, erase its program memory and load `program`.
pub fn load_program<R: Registers>(hw: &mut R, program: &[Instruction]) {
    trace!("Loading CSP program with {} instructions.", program.len());
    hw.strobe(CspCommand::Stop);
    hw.strobe(CspCommand::Clear);
    for instruction in program {
        hw.write(Reg::Rfst, instruction.encode());
    }
}

/// Start the loaded program with the given register values.
pub fn start<R: Registers>(hw: &mut R, x: u8, y: u8, z: u8) {
    hw.write(Reg::CspX, x);
    hw.write(Reg::CspY, y);
    hw.write(Reg::CspZ, z);
    hw.strobe(CspCommand::Start);
}

/// What the CSP can observe about the world.
pub trait Channel {
    /// Result of a clear channel assessment.
    fn is_clear(&mut self) -> bool;
    /// Whether a frame is currently being received.
    fn sfd_seen(&mut self) -> bool {
        false
    }
    /// A random byte for `RANDXY`.
    fn random(&mut self) -> u8;
}

/// How a program run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The program issued `TXON`.
    Transmitted,
    /// The program raised `CSP_MANINT`.
    Interrupt,
    /// The program ran off its end, or hit the step limit.
    Stopped,
}

/// The result of running a program in the [Sequencer].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Run {
    pub outcome: Outcome,
    /// Number of clear channel assessments performed.
    pub assessments: u8,
    /// Total number of backoff periods waited.
    pub backoff_periods: u32,
    /// The highest value `Y` reached.
    pub max_y: u8,
}

/// A software model of the CSP.
#[derive(Clone, Debug, Default)]
pub struct Sequencer {
    program: Vec<Instruction, PROGRAM_CAPACITY>,
    pub x: u8,
    pub y: u8,
    pub z: u8,
}
impl Sequencer {
    /// Upper bound on executed instructions, so that endless programs terminate.
    const STEP_LIMIT: usize = 4096;

    pub const fn new() -> Self {
        Self {
            program: Vec::new(),
            x: 0,
            y: 0,
            z: 0,
        }
    }
    pub fn clear(&mut self) {
        self.program.clear();
    }
    /// Append an encoded instruction, as the hardware does when `RFST` is written while the
    /// program is stopped.
    ///
    /// Returns `false` if the byte isn't an instruction or the program memory is full.
    pub fn push(&mut self, byte: u8) -> bool {
        match Instruction::decode(byte) {
            Some(instruction) => self.program.push(instruction).is_ok(),
            None => false,
        }
    }
    pub fn program(&self) -> &[Instruction] {
        &self.program
    }
    fn test(&self, channel: &mut impl Channel, condition: Condition, negate: bool) -> bool {
        let result = match condition {
            Condition::ChannelClear => channel.is_clear(),
            Condition::SfdSeen => channel.sfd_seen(),
            Condition::XIsZero => self.x == 0,
            Condition::YIsZero => self.y == 0,
            Condition::ZIsZero => self.z == 0,
            Condition::RssiValid => true,
            Condition::CpuControl | Condition::EndOfInstruction => false,
        };
        result != negate
    }
    /// Run the program from the start, until it stops, transmits or raises an interrupt.
    pub fn run(&mut self, channel: &mut impl Channel) -> Run {
        let mut run = Run {
            outcome: Outcome::Stopped,
            assessments: 0,
            backoff_periods: 0,
            max_y: self.y,
        };
        let mut pc = 0;
        let mut label = 0;
        let mut transmitted = false;
        for _ in 0..Self::STEP_LIMIT {
            let Some(instruction) = self.program.get(pc).copied() else {
                break;
            };
            pc += 1;
            match instruction {
                Instruction::Skip {
                    count,
                    condition,
                    negate,
                } => {
                    if condition == Condition::ChannelClear {
                        run.assessments = run.assessments.saturating_add(1);
                    }
                    if self.test(channel, condition, negate) {
                        pc += count as usize;
                    }
                }
                Instruction::Repeat { condition, negate } => {
                    if self.test(channel, condition, negate) {
                        pc = label;
                    }
                }
                Instruction::Label => label = pc,
                Instruction::RandXY => {
                    self.x = channel.random() & ((1u8 << self.y.min(7)) - 1);
                }
                Instruction::WaitX => run.backoff_periods += u32::from(self.x),
                Instruction::IncMaxY(max) => {
                    self.y = (self.y + 1).min(max);
                    run.max_y = run.max_y.max(self.y);
                }
                Instruction::IncZ => self.z = self.z.wrapping_add(1),
                Instruction::DecZ => self.z = self.z.wrapping_sub(1),
                Instruction::Int => {
                    run.outcome = Outcome::Interrupt;
                    return run;
                }
                Instruction::Strobe(command) if command == CspCommand::TxOn => transmitted = true,
                Instruction::Strobe(command) if command == CspCommand::Stop => break,
                Instruction::Strobe(_) => {}
            }
        }
        if transmitted {
            run.outcome = Outcome::Transmitted;
        }
        run
    }
}
