#![allow(missing_docs)] // Don't require docs for test code
//! A behavioural model of the SoC debug port, usable in place of the real
//! simulation in tests and dry runs.
//!
//! The model implements the TAP state machine, the RISC-V DTM (`dtmcs` and
//! `dmi`), a debug module with a single hart and a word addressed system bus.
//! Time inside the model only advances in Run-Test/Idle: DMI read latency,
//! abstract command latency and system bus latency are all counted in TCK
//! cycles spent there with TMS low.

use std::collections::BTreeMap;

use crate::architecture::riscv::{
    Abstractcs, AccessRegisterCommand, Data0, DebugRegister, Dmcontrol, Dmstatus, Sbaddress0,
    Sbaddress1, Sbcs, Sbdata0, DPC, GPR_BASE, SBACCESS_32,
};
use crate::config::DEFAULT_IDCODE;

use super::{JtagInstruction, JtagPins, IR_LENGTH};

/// The sixteen states of the IEEE 1149.1 TAP controller.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TapState {
    TestLogicReset,
    RunTestIdle,
    SelectDrScan,
    CaptureDr,
    ShiftDr,
    Exit1Dr,
    PauseDr,
    Exit2Dr,
    UpdateDr,
    SelectIrScan,
    CaptureIr,
    ShiftIr,
    Exit1Ir,
    PauseIr,
    Exit2Ir,
    UpdateIr,
}

impl TapState {
    /// State after a rising TCK edge with the given TMS level.
    pub fn next(self, tms: bool) -> Self {
        match (self, tms) {
            (Self::TestLogicReset, true) => Self::TestLogicReset,
            (Self::TestLogicReset, false) => Self::RunTestIdle,
            (Self::RunTestIdle, true) => Self::SelectDrScan,
            (Self::RunTestIdle, false) => Self::RunTestIdle,

            (Self::SelectDrScan, true) => Self::SelectIrScan,
            (Self::SelectDrScan, false) => Self::CaptureDr,
            (Self::CaptureDr, true) => Self::Exit1Dr,
            (Self::CaptureDr, false) => Self::ShiftDr,
            (Self::ShiftDr, true) => Self::Exit1Dr,
            (Self::ShiftDr, false) => Self::ShiftDr,
            (Self::Exit1Dr, true) => Self::UpdateDr,
            (Self::Exit1Dr, false) => Self::PauseDr,
            (Self::PauseDr, true) => Self::Exit2Dr,
            (Self::PauseDr, false) => Self::PauseDr,
            (Self::Exit2Dr, true) => Self::UpdateDr,
            (Self::Exit2Dr, false) => Self::ShiftDr,
            (Self::UpdateDr, true) => Self::SelectDrScan,
            (Self::UpdateDr, false) => Self::RunTestIdle,

            (Self::SelectIrScan, true) => Self::TestLogicReset,
            (Self::SelectIrScan, false) => Self::CaptureIr,
            (Self::CaptureIr, true) => Self::Exit1Ir,
            (Self::CaptureIr, false) => Self::ShiftIr,
            (Self::ShiftIr, true) => Self::Exit1Ir,
            (Self::ShiftIr, false) => Self::ShiftIr,
            (Self::Exit1Ir, true) => Self::UpdateIr,
            (Self::Exit1Ir, false) => Self::PauseIr,
            (Self::PauseIr, true) => Self::Exit2Ir,
            (Self::PauseIr, false) => Self::PauseIr,
            (Self::Exit2Ir, true) => Self::UpdateIr,
            (Self::Exit2Ir, false) => Self::ShiftIr,
            (Self::UpdateIr, true) => Self::SelectDrScan,
            (Self::UpdateIr, false) => Self::RunTestIdle,
        }
    }
}

/// Counters kept by [`FakeDut`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FakeDutStats {
    /// DMI read requests accepted by the DTM.
    pub dmi_read_requests: u32,
    /// DMI writes accepted by the DTM.
    pub dmi_writes: u32,
    /// `dmireset` or `dmihardreset` writes to `dtmcs`.
    pub dmi_resets: u32,
    /// DMI writes to `sbdata0`.
    pub sbdata0_writes: u32,
    /// DMI reads of `sbcs`.
    pub sbcs_reads: u32,
    /// Run-Test/Idle cycles between each read request and the scan that
    /// collected it.
    pub read_waits: Vec<u32>,
}

const DMI_BUSY: u8 = 3;
const DMI_FAILED: u8 = 2;

#[derive(Debug)]
pub struct FakeDut {
    tck: bool,
    tms: bool,
    tdi: bool,
    trst_n: bool,
    tdo: bool,
    last_tck: bool,

    state: TapState,
    ir: u8,
    ir_shift: u8,
    dr: u128,
    dr_len: u32,
    idcode: u32,
    dtmcs_override: Option<u32>,

    abits: u32,
    idle_hint: u32,
    /// Sticky `op` value of the `dmi` register.
    dmi_status: u8,
    pending_read: Option<u8>,
    idle_since_request: u32,
    last_address: u8,
    last_data: u32,
    dmi_latency: u32,
    forced_busy: u32,
    fail_next_read: bool,

    dmactive: bool,
    haltreq: bool,
    resumereq: bool,
    activation_delay: u32,
    activation_reads_left: u32,
    halted: bool,
    resumeack: bool,

    data0: u32,
    cmderr: u8,
    command_busy: u32,
    abstract_latency: u32,
    dpc: u32,
    gprs: [u32; 32],

    sbcs: Sbcs,
    sb_busy: u32,
    sba_latency: u32,
    sbaddress: u64,
    sbdata0: u32,
    injected_sberror: Option<u8>,
    memory: BTreeMap<u64, u32>,

    stats: FakeDutStats,
}

impl Default for FakeDut {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDut {
    /// `idle` field reported in `dtmcs`.
    pub const DEFAULT_IDLE_HINT: u32 = 1;
    /// Run-Test/Idle cycles a DMI read needs before it can be collected.
    pub const DEFAULT_DMI_LATENCY: u32 = 4;
    pub const DEFAULT_ABSTRACT_LATENCY: u32 = 2;

    pub fn new() -> Self {
        Self {
            tck: false,
            tms: false,
            tdi: false,
            trst_n: true,
            tdo: false,
            last_tck: false,

            state: TapState::TestLogicReset,
            ir: JtagInstruction::IdCode.opcode(),
            ir_shift: 0,
            dr: 0,
            dr_len: 1,
            idcode: DEFAULT_IDCODE,
            dtmcs_override: None,

            abits: 7,
            idle_hint: Self::DEFAULT_IDLE_HINT,
            dmi_status: 0,
            pending_read: None,
            idle_since_request: 0,
            last_address: 0,
            last_data: 0,
            dmi_latency: Self::DEFAULT_DMI_LATENCY,
            forced_busy: 0,
            fail_next_read: false,

            dmactive: false,
            haltreq: false,
            resumereq: false,
            activation_delay: 0,
            activation_reads_left: 0,
            halted: false,
            resumeack: false,

            data0: 0,
            cmderr: 0,
            command_busy: 0,
            abstract_latency: Self::DEFAULT_ABSTRACT_LATENCY,
            dpc: 0,
            gprs: [0; 32],

            sbcs: Sbcs(0),
            sb_busy: 0,
            sba_latency: 0,
            sbaddress: 0,
            sbdata0: 0,
            injected_sberror: None,
            memory: BTreeMap::new(),

            stats: FakeDutStats::default(),
        }
    }

    pub fn set_idcode(&mut self, idcode: u32) {
        self.idcode = idcode;
    }

    /// Make `dtmcs` read as a fixed value.
    pub fn set_dtmcs_override(&mut self, dtmcs: Option<u32>) {
        self.dtmcs_override = dtmcs;
    }

    pub fn set_dmi_latency(&mut self, cycles: u32) {
        self.dmi_latency = cycles;
    }

    /// Answer the next `count` DMI reads with BUSY, regardless of latency.
    pub fn force_busy(&mut self, count: u32) {
        self.forced_busy = count;
    }

    /// Fail the next DMI read with the `failed` status.
    pub fn inject_dmi_failure(&mut self) {
        self.fail_next_read = true;
    }

    pub fn set_abstract_latency(&mut self, cycles: u32) {
        self.abstract_latency = cycles;
    }

    pub fn set_sba_latency(&mut self, cycles: u32) {
        self.sba_latency = cycles;
    }

    /// The next system bus transfer raises `sberror = code` right away and
    /// stays busy for the usual latency.
    pub fn inject_sberror(&mut self, code: u8) {
        self.injected_sberror = Some(code);
    }

    /// `dmactive` reads back as zero this many times after activation.
    pub fn set_activation_delay(&mut self, reads: u32) {
        self.activation_delay = reads;
    }

    pub fn memory_word(&self, address: u64) -> Option<u32> {
        self.memory.get(&address).copied()
    }

    pub fn set_memory_word(&mut self, address: u64, value: u32) {
        self.memory.insert(address, value);
    }

    /// Every word written so far, by address.
    pub fn memory(&self) -> &BTreeMap<u64, u32> {
        &self.memory
    }

    pub fn hart_halted(&self) -> bool {
        self.halted
    }

    pub fn dpc(&self) -> u32 {
        self.dpc
    }

    pub fn gpr(&self, index: usize) -> u32 {
        self.gprs[index]
    }

    pub fn tap_state(&self) -> TapState {
        self.state
    }

    pub fn ir(&self) -> u8 {
        self.ir
    }

    pub fn stats(&self) -> &FakeDutStats {
        &self.stats
    }

    fn dmi_len(&self) -> u32 {
        self.abits + 34
    }

    fn dtmcs(&self) -> u32 {
        self.dtmcs_override.unwrap_or(
            1 | (self.abits << 4) | (u32::from(self.dmi_status) << 10) | (self.idle_hint << 12),
        )
    }

    fn rising_edge(&mut self) {
        match self.state {
            TapState::CaptureDr => self.capture_dr(),
            TapState::ShiftDr => {
                self.dr = (self.dr >> 1) | (u128::from(self.tdi) << (self.dr_len - 1));
            }
            TapState::CaptureIr => self.ir_shift = 0b00001,
            TapState::ShiftIr => {
                self.ir_shift = (self.ir_shift >> 1) | (u8::from(self.tdi) << (IR_LENGTH - 1));
            }
            TapState::RunTestIdle if !self.tms => self.idle_cycle(),
            _ => {}
        }

        self.state = self.state.next(self.tms);

        if self.state == TapState::TestLogicReset {
            self.ir = JtagInstruction::IdCode.opcode();
        }
    }

    fn falling_edge(&mut self) {
        match self.state {
            TapState::ShiftDr => self.tdo = self.dr & 1 == 1,
            TapState::ShiftIr => self.tdo = self.ir_shift & 1 == 1,
            TapState::UpdateDr => self.update_dr(),
            TapState::UpdateIr => self.ir = self.ir_shift,
            _ => {}
        }
    }

    fn idle_cycle(&mut self) {
        if self.pending_read.is_some() {
            self.idle_since_request += 1;
        }
        self.command_busy = self.command_busy.saturating_sub(1);
        self.sb_busy = self.sb_busy.saturating_sub(1);
    }

    fn capture_dr(&mut self) {
        let (dr, len) = match JtagInstruction::from_opcode(self.ir) {
            Some(JtagInstruction::IdCode) => (u128::from(self.idcode), 32),
            Some(JtagInstruction::Dtmcs) => (u128::from(self.dtmcs()), 32),
            Some(JtagInstruction::DmiAccess) => (self.capture_dmi(), self.dmi_len()),
            Some(JtagInstruction::Bypass) | None => (0, 1),
        };

        self.dr = dr;
        self.dr_len = len;
    }

    fn update_dr(&mut self) {
        match JtagInstruction::from_opcode(self.ir) {
            Some(JtagInstruction::Dtmcs) => {
                let value = self.dr as u32;
                if value & (0b11 << 16) != 0 {
                    self.dmi_status = 0;
                    self.pending_read = None;
                    self.stats.dmi_resets += 1;
                }
            }
            Some(JtagInstruction::DmiAccess) => self.update_dmi(),
            _ => {}
        }
    }

    fn capture_dmi(&mut self) -> u128 {
        if let Some(address) = self.pending_read.take() {
            self.stats.read_waits.push(self.idle_since_request);

            if self.forced_busy > 0 {
                self.forced_busy -= 1;
                self.dmi_status = DMI_BUSY;
            } else if self.idle_since_request < self.dmi_latency {
                self.dmi_status = DMI_BUSY;
            } else if self.fail_next_read {
                self.fail_next_read = false;
                self.dmi_status = DMI_FAILED;
            } else {
                self.last_data = self.dm_read(address);
            }
        }

        (u128::from(self.last_address) << 34)
            | (u128::from(self.last_data) << 2)
            | u128::from(self.dmi_status)
    }

    fn update_dmi(&mut self) {
        if self.dmi_status != 0 {
            return;
        }

        let op = (self.dr & 0b11) as u8;
        let data = (self.dr >> 2) as u32;
        let address = ((self.dr >> 34) & ((1 << self.abits) - 1)) as u8;

        match op {
            1 if self.pending_read.is_some() => self.dmi_status = DMI_BUSY,
            1 => {
                self.pending_read = Some(address);
                self.idle_since_request = 0;
                self.last_address = address;
                self.stats.dmi_read_requests += 1;
            }
            2 => {
                self.last_address = address;
                self.stats.dmi_writes += 1;
                self.dm_write(address, data);
            }
            _ => {}
        }
    }

    fn dm_read(&mut self, address: u8) -> u32 {
        match address {
            a if a == Dmcontrol::ADDRESS => {
                let mut control = Dmcontrol(0);
                control.set_haltreq(self.haltreq);
                control.set_resumereq(self.resumereq);
                if self.activation_reads_left > 0 {
                    self.activation_reads_left -= 1;
                } else {
                    control.set_dmactive(self.dmactive);
                }
                control.0
            }
            a if a == Dmstatus::ADDRESS => {
                let mut status = Dmstatus(0);
                status.set_version(2);
                status.set_authenticated(true);
                status.set_allhalted(self.halted);
                status.set_anyhalted(self.halted);
                status.set_allrunning(!self.halted);
                status.set_anyrunning(!self.halted);
                status.set_allresumeack(self.resumeack);
                status.set_anyresumeack(self.resumeack);
                status.0
            }
            a if a == Abstractcs::ADDRESS => {
                let mut abstractcs = Abstractcs(0);
                abstractcs.set_datacount(1);
                abstractcs.set_busy(self.command_busy > 0);
                abstractcs.set_cmderr(self.cmderr.into());
                abstractcs.0
            }
            a if a == Data0::ADDRESS => {
                if self.command_busy > 0 {
                    self.set_cmderr(1);
                }
                self.data0
            }
            a if a == Sbcs::ADDRESS => {
                self.stats.sbcs_reads += 1;
                let mut sbcs = self.sbcs;
                sbcs.set_sbversion(1);
                sbcs.set_sbasize(64);
                sbcs.set_sbaccess32(true);
                sbcs.set_sbbusy(self.sb_busy > 0);
                sbcs.0
            }
            a if a == Sbaddress0::ADDRESS => self.sbaddress as u32,
            a if a == Sbaddress1::ADDRESS => (self.sbaddress >> 32) as u32,
            a if a == Sbdata0::ADDRESS => {
                if self.sb_busy > 0 {
                    self.sbcs.set_sbbusyerror(true);
                    return self.sbdata0;
                }
                let value = self.sbdata0;
                if self.sbcs.sbreadondata() && self.sba_ready() {
                    self.sba_read();
                }
                value
            }
            _ => 0,
        }
    }

    fn dm_write(&mut self, address: u8, value: u32) {
        match address {
            a if a == Dmcontrol::ADDRESS => {
                let control = Dmcontrol(value);

                if control.dmactive() && !self.dmactive {
                    self.activation_reads_left = self.activation_delay;
                }
                self.dmactive = control.dmactive();
                self.haltreq = control.haltreq();
                self.resumereq = control.resumereq();

                if !self.dmactive {
                    return;
                }

                if control.haltreq() {
                    self.halted = true;
                    self.resumeack = false;
                } else if control.resumereq() {
                    self.halted = false;
                    self.resumeack = true;
                }
            }
            a if a == Abstractcs::ADDRESS => {
                let abstractcs = Abstractcs(value);
                if self.command_busy > 0 {
                    self.set_cmderr(1);
                } else {
                    self.cmderr &= !(abstractcs.cmderr() as u8);
                }
            }
            a if a == Data0::ADDRESS => {
                if self.command_busy > 0 {
                    self.set_cmderr(1);
                } else {
                    self.data0 = value;
                }
            }
            a if a == AccessRegisterCommand::ADDRESS => {
                if self.command_busy > 0 {
                    self.set_cmderr(1);
                } else if self.cmderr == 0 {
                    self.execute_command(AccessRegisterCommand(value));
                }
            }
            a if a == Sbcs::ADDRESS => {
                let written = Sbcs(value);
                let mut sbcs = self.sbcs;
                if written.sbbusyerror() {
                    sbcs.set_sbbusyerror(false);
                }
                sbcs.set_sberror(sbcs.sberror() & !written.sberror());
                sbcs.set_sbreadonaddr(written.sbreadonaddr());
                sbcs.set_sbaccess(written.sbaccess());
                sbcs.set_sbautoincrement(written.sbautoincrement());
                sbcs.set_sbreadondata(written.sbreadondata());
                self.sbcs = sbcs;
            }
            a if a == Sbaddress0::ADDRESS => {
                if self.sb_busy > 0 {
                    self.sbcs.set_sbbusyerror(true);
                    return;
                }
                self.sbaddress = (self.sbaddress & !0xFFFF_FFFF) | u64::from(value);
                if self.sbcs.sbreadonaddr() && self.sba_ready() {
                    self.sba_read();
                }
            }
            a if a == Sbaddress1::ADDRESS => {
                if self.sb_busy > 0 {
                    self.sbcs.set_sbbusyerror(true);
                    return;
                }
                self.sbaddress = (self.sbaddress & 0xFFFF_FFFF) | (u64::from(value) << 32);
            }
            a if a == Sbdata0::ADDRESS => {
                self.stats.sbdata0_writes += 1;
                if self.sb_busy > 0 {
                    self.sbcs.set_sbbusyerror(true);
                    return;
                }
                self.sbdata0 = value;
                if self.sba_ready() {
                    self.sba_write();
                }
            }
            _ => {}
        }
    }

    fn set_cmderr(&mut self, value: u8) {
        if self.cmderr == 0 {
            self.cmderr = value;
        }
    }

    fn execute_command(&mut self, command: AccessRegisterCommand) {
        self.command_busy = self.abstract_latency;

        if command.cmd_type() != 0 || command.aarsize() != 2 {
            self.set_cmderr(2);
            return;
        }

        if !command.transfer() {
            return;
        }

        if !self.halted {
            self.set_cmderr(4);
            return;
        }

        let regno = command.regno();
        let register = match regno {
            DPC => &mut self.dpc,
            r if (GPR_BASE..GPR_BASE + 32).contains(&r) => &mut self.gprs[usize::from(r - GPR_BASE)],
            _ => {
                self.set_cmderr(3);
                return;
            }
        };

        if command.write() {
            *register = self.data0;
        } else {
            self.data0 = *register;
        }

        // x0 is hardwired to zero
        self.gprs[0] = 0;
    }

    /// No sticky system bus error is pending.
    fn sba_ready(&self) -> bool {
        self.sbcs.sberror() == 0 && !self.sbcs.sbbusyerror()
    }

    /// Start a transfer. Returns the address to access, or `None` if the
    /// transfer failed.
    fn sba_start(&mut self) -> Option<u64> {
        self.sb_busy = self.sba_latency;

        if let Some(code) = self.injected_sberror.take() {
            self.sbcs.set_sberror(code.into());
            return None;
        }

        if self.sbcs.sbaccess() != SBACCESS_32 {
            self.sbcs.set_sberror(4);
            return None;
        }

        if self.sbaddress % 4 != 0 {
            self.sbcs.set_sberror(3);
            return None;
        }

        let address = self.sbaddress;
        if self.sbcs.sbautoincrement() {
            self.sbaddress = self.sbaddress.wrapping_add(4);
        }
        Some(address)
    }

    fn sba_read(&mut self) {
        if let Some(address) = self.sba_start() {
            self.sbdata0 = self.memory.get(&address).copied().unwrap_or(0);
        }
    }

    fn sba_write(&mut self) {
        if let Some(address) = self.sba_start() {
            self.memory.insert(address, self.sbdata0);
        }
    }
}

impl JtagPins for FakeDut {
    fn set_tck(&mut self, level: bool) {
        self.tck = level;
    }

    fn set_tms(&mut self, level: bool) {
        self.tms = level;
    }

    fn set_tdi(&mut self, level: bool) {
        self.tdi = level;
    }

    fn set_trst_n(&mut self, level: bool) {
        self.trst_n = level;
    }

    fn tdo(&self) -> bool {
        self.tdo
    }

    fn step(&mut self) {
        if !self.trst_n {
            self.state = TapState::TestLogicReset;
            self.ir = JtagInstruction::IdCode.opcode();
            self.last_tck = self.tck;
            return;
        }

        if self.tck && !self.last_tck {
            self.rising_edge();
        } else if !self.tck && self.last_tck {
            self.falling_edge();
        }

        self.last_tck = self.tck;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_tms_high_reach_reset_from_anywhere() {
        for start in [
            TapState::RunTestIdle,
            TapState::ShiftDr,
            TapState::PauseIr,
            TapState::UpdateDr,
            TapState::Exit2Ir,
        ] {
            let state = (0..5).fold(start, |state, _| state.next(true));
            assert_eq!(state, TapState::TestLogicReset, "starting from {start:?}");
        }
    }

    #[test]
    fn dr_scan_path() {
        let path = [true, false, false, true, true, false];
        let states: Vec<TapState> = path
            .iter()
            .scan(TapState::RunTestIdle, |state, tms| {
                *state = state.next(*tms);
                Some(*state)
            })
            .collect();

        assert_eq!(
            states,
            vec![
                TapState::SelectDrScan,
                TapState::CaptureDr,
                TapState::ShiftDr,
                TapState::Exit1Dr,
                TapState::UpdateDr,
                TapState::RunTestIdle,
            ]
        );
    }

    #[test]
    fn trst_forces_idcode() {
        let mut dut = FakeDut::new();
        dut.ir = JtagInstruction::Bypass.opcode();
        dut.state = TapState::ShiftDr;

        dut.set_trst_n(false);
        dut.step();

        assert_eq!(dut.tap_state(), TapState::TestLogicReset);
        assert_eq!(dut.ir(), JtagInstruction::IdCode.opcode());
    }
}
