//! RISC-V debug support: the JTAG debug transport module and the debug module
//! behind it, as described in the RISC-V external debug specification v0.13.2.

use bitfield::bitfield;

#[macro_use]
mod register;

pub mod communication_interface;
pub mod dtm;

pub use communication_interface::{
    AbstractCommandErrorKind, DebugRegister, MemoryTestReport, RiscvCommunicationInterface,
    RiscvError, SbaErrorKind,
};
pub use dtm::{DmiOperation, DmiOperationStatus, Dtm, Dtmcs};

/// CSR number of the debug program counter, `dpc`.
pub const DPC: u16 = 0x7b1;

/// Abstract register number of GPR `x0`. `x1`..`x31` follow.
pub const GPR_BASE: u16 = 0x1000;

bitfield! {
    /// `dmcontrol` register, located at address 0x10
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Dmcontrol(u32);
    impl Debug;

    pub haltreq, set_haltreq: 31;
    pub resumereq, set_resumereq: 30;
    pub hartreset, set_hartreset: 29;
    pub ackhavereset, set_ackhavereset: 28;
    pub hasel, set_hasel: 26;
    pub hartsello, set_hartsello: 25, 16;
    pub hartselhi, set_hartselhi: 15, 6;
    pub setresethaltreq, set_resethaltreq: 3;
    pub clrresethaltreq, set_clrresethaltreq: 2;
    pub ndmreset, set_ndmreset: 1;
    pub dmactive, set_dmactive: 0;
}

debug_register!(Dmcontrol, 0x10, "dmcontrol");

bitfield! {
    /// Readonly `dmstatus` register.
    ///
    /// Located at address 0x11
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Dmstatus(u32);
    impl Debug;

    pub impebreak, _: 22;
    pub allhavereset, set_allhavereset: 19;
    pub anyhavereset, set_anyhavereset: 18;
    pub allresumeack, set_allresumeack: 17;
    pub anyresumeack, set_anyresumeack: 16;
    pub allnonexistent, _: 15;
    pub anynonexistent, _: 14;
    pub allunavail, _: 13;
    pub anyunavail, _: 12;
    pub allrunning, set_allrunning: 11;
    pub anyrunning, set_anyrunning: 10;
    pub allhalted, set_allhalted: 9;
    pub anyhalted, set_anyhalted: 8;
    pub authenticated, set_authenticated: 7;
    pub authbusy, _: 6;
    pub hasresethaltreq, _: 5;
    pub confstrptrvalid, _: 4;
    pub version, set_version: 3, 0;
}

debug_register!(Dmstatus, 0x11, "dmstatus");

bitfield! {
    /// Abstract command control and status, located at address 0x16
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Abstractcs(u32);
    impl Debug;

    pub progbufsize, _: 28, 24;
    pub busy, set_busy: 12;
    pub cmderr, set_cmderr: 10, 8;
    pub datacount, set_datacount: 3, 0;
}

debug_register!(Abstractcs, 0x16, "abstractcs");

bitfield! {
    /// Access register abstract command, written to `command` (0x17).
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct AccessRegisterCommand(u32);
    impl Debug;

    pub u8, cmd_type, set_cmd_type: 31, 24;
    pub u8, aarsize, set_aarsize: 22, 20;
    pub aarpostincrement, set_aarpostincrement: 19;
    pub postexec, set_postexec: 18;
    pub transfer, set_transfer: 17;
    pub write, set_write: 16;
    pub u16, regno, set_regno: 15, 0;
}

debug_register!(AccessRegisterCommand, 0x17, "command");

bitfield! {
    /// System bus access control and status, located at address 0x38
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Sbcs(u32);
    impl Debug;

    pub sbversion, set_sbversion: 31, 29;
    pub sbbusyerror, set_sbbusyerror: 22;
    pub sbbusy, set_sbbusy: 21;
    pub sbreadonaddr, set_sbreadonaddr: 20;
    pub sbaccess, set_sbaccess: 19, 17;
    pub sbautoincrement, set_sbautoincrement: 16;
    pub sbreadondata, set_sbreadondata: 15;
    pub sberror, set_sberror: 14, 12;
    pub sbasize, set_sbasize: 11, 5;
    pub sbaccess128, set_sbaccess128: 4;
    pub sbaccess64, set_sbaccess64: 3;
    pub sbaccess32, set_sbaccess32: 2;
    pub sbaccess16, set_sbaccess16: 1;
    pub sbaccess8, set_sbaccess8: 0;
}

debug_register!(Sbcs, 0x38, "sbcs");

/// `sbaccess` value selecting 32 bit system bus accesses.
pub const SBACCESS_32: u32 = 2;

data_register! { pub Data0, 0x04, "data0" }
data_register! { pub Sbaddress0, 0x39, "sbaddress0" }
data_register! { pub Sbaddress1, 0x3A, "sbaddress1" }
data_register! { pub Sbdata0, 0x3C, "sbdata0" }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dm_register_addresses() {
        assert_eq!(Dmcontrol::ADDRESS, 0x10);
        assert_eq!(Dmstatus::ADDRESS, 0x11);
        assert_eq!(Abstractcs::ADDRESS, 0x16);
        assert_eq!(Sbcs::ADDRESS, 0x38);
        assert_eq!(Sbaddress0::ADDRESS, 0x39);
        assert_eq!(Sbaddress1::ADDRESS, 0x3A);
        assert_eq!(Sbdata0::ADDRESS, 0x3C);
    }

    #[test]
    fn sbcs_word_read_on_address() {
        let mut sbcs = Sbcs(0);
        sbcs.set_sbaccess(SBACCESS_32);
        sbcs.set_sbreadonaddr(true);

        assert_eq!(sbcs.0, 0x0014_0000);
    }

    #[test]
    fn access_register_write_dpc() {
        let mut command = AccessRegisterCommand(0);
        command.set_cmd_type(0);
        command.set_aarsize(2);
        command.set_transfer(true);
        command.set_write(true);
        command.set_regno(DPC);

        assert_eq!(command.0, 0x0023_07b1);
        assert_eq!(command.regno(), DPC);
    }
}
