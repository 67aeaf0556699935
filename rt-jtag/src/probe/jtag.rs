use bitvec::prelude::*;

use super::{JtagInstruction, JtagPins, IR_LENGTH};

/// Counters for the scans issued by a [`JtagAdapter`].
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ScanStats {
    /// Number of IR scans that were actually shifted.
    pub ir_scans: u64,
    /// Number of times Shift-DR was entered.
    pub dr_scans: u64,
    /// Number of full TCK periods.
    pub tck_cycles: u64,
}

/// Walks the TAP of a simulated device through its states and shifts data.
///
/// The TAP state is never stored. Every public operation starts from
/// Run-Test/Idle (or a reset) and returns to Run-Test/Idle, replaying a fixed
/// TMS sequence in between.
#[derive(Debug)]
pub struct JtagAdapter<P> {
    pins: P,
    /// System clock half periods per TCK phase.
    clock_period: u32,
    /// Last instruction shifted into IR, `None` if unknown.
    cached_ir: Option<JtagInstruction>,
    stats: ScanStats,
}

impl<P: JtagPins> JtagAdapter<P> {
    pub fn new(pins: P, clock_period: u32) -> Self {
        Self {
            pins,
            clock_period: clock_period.max(1),
            cached_ir: None,
            stats: ScanStats::default(),
        }
    }

    pub fn pins(&self) -> &P {
        &self.pins
    }

    pub fn pins_mut(&mut self) -> &mut P {
        &mut self.pins
    }

    pub fn into_pins(self) -> P {
        self.pins
    }

    pub fn scan_stats(&self) -> ScanStats {
        self.stats
    }

    pub fn reset_scan_stats(&mut self) {
        self.stats = ScanStats::default();
    }

    /// The instruction currently believed to be in IR.
    pub fn cached_ir(&self) -> Option<JtagInstruction> {
        self.cached_ir
    }

    /// Clocks out tms and tdi and samples tdo. TCK starts and ends low; TDO is
    /// sampled right before the rising edge.
    pub fn tick(&mut self, tms: bool, tdi: bool) -> bool {
        self.pins.set_tms(tms);
        self.pins.set_tdi(tdi);
        self.pins.set_tck(false);
        self.half_period();

        let tdo = self.pins.tdo();

        self.pins.set_tck(true);
        self.half_period();
        self.pins.set_tck(false);

        self.stats.tck_cycles += 1;
        tdo
    }

    fn half_period(&mut self) {
        for _ in 0..self.clock_period {
            self.pins.step();
        }
    }

    /// clock out the provided tms bits
    fn write_tms(&mut self, tmss: &[bool]) {
        for tms in tmss {
            self.tick(*tms, false);
        }
    }

    /// Assert TRST for two clocks, then move to Run-Test/Idle.
    pub fn reset(&mut self) {
        self.pins.set_tms(false);
        self.pins.set_tdi(false);
        self.pins.set_trst_n(false);
        self.write_tms(&[false, false]);
        self.pins.set_trst_n(true);

        // Test-Logic-Reset -> Run-Test/Idle
        self.write_tms(&[false]);

        self.cached_ir = None;
        tracing::debug!("TAP reset done after {} TCK cycles", self.stats.tck_cycles);
    }

    /// Reset the TAP through the state machine only. Five TMS high clocks reach
    /// Test-Logic-Reset from any state.
    pub fn softreset(&mut self) {
        self.pins.set_trst_n(true);
        self.write_tms(&[true, true, true, true, true]);
        self.write_tms(&[false]);

        // The TAP falls back to IDCODE, which we don't want to rely on.
        self.cached_ir = None;
        tracing::debug!(
            "TAP softreset done after {} TCK cycles",
            self.stats.tck_cycles
        );
    }

    /// Load `instruction` into IR, unless it is already there.
    pub fn set_ir(&mut self, instruction: JtagInstruction) {
        if self.cached_ir == Some(instruction) {
            return;
        }

        tracing::trace!("set_ir({:?})", instruction);

        // Run-Test/Idle -> Select-DR -> Select-IR -> Capture-IR -> Shift-IR
        self.write_tms(&[true, true, false, false]);

        let opcode = instruction.opcode();
        for bit in 0..IR_LENGTH {
            let tdi = (opcode >> bit) & 1 == 1;
            // The last bit moves us to Exit1-IR.
            self.tick(bit == IR_LENGTH - 1, tdi);
        }

        // Update-IR, then Run-Test/Idle
        self.write_tms(&[true, false]);

        self.cached_ir = Some(instruction);
        self.stats.ir_scans += 1;
    }

    /// Run-Test/Idle -> Select-DR -> Capture-DR -> Shift-DR
    pub fn shift_dr(&mut self) {
        self.write_tms(&[true, false, false]);
        self.stats.dr_scans += 1;
    }

    /// Shift `data` LSB first while in Shift-DR. With `tms_last` set the last
    /// bit also moves the TAP to Exit1-DR.
    pub fn write_bits(&mut self, data: &BitSlice<u8>, tms_last: bool) {
        let last = data.len().saturating_sub(1);
        for (index, tdi) in data.iter().by_vals().enumerate() {
            self.tick(tms_last && index == last, tdi);
        }
    }

    /// Like [`write_bits`](Self::write_bits), returning the bits shifted out on TDO.
    pub fn readwrite_bits(&mut self, data: &BitSlice<u8>, tms_last: bool) -> BitVec<u8> {
        let mut tdos = BitVec::with_capacity(data.len());

        let last = data.len().saturating_sub(1);
        for (index, tdi) in data.iter().by_vals().enumerate() {
            tdos.push(self.tick(tms_last && index == last, tdi));
        }

        tdos
    }

    /// Shift the `len` low bits of `value`.
    pub fn write_word(&mut self, value: u64, len: u32, tms_last: bool) {
        assert!(
            (1..=64).contains(&len),
            "register length of {len} bits does not fit a word"
        );

        let bytes = value.to_le_bytes();
        self.write_bits(&bytes.view_bits::<Lsb0>()[..len as usize], tms_last);
    }

    /// Shift the `len` low bits of `value` and return what came out of TDO.
    pub fn readwrite_word(&mut self, value: u64, len: u32, tms_last: bool) -> u64 {
        assert!(
            (1..=64).contains(&len),
            "register length of {len} bits does not fit a word"
        );

        let bytes = value.to_le_bytes();
        let tdos = self.readwrite_bits(&bytes.view_bits::<Lsb0>()[..len as usize], tms_last);

        tdos.load_le::<u64>()
    }

    /// Leave Shift-DR (or Exit1-DR, when `exit1_reached`) through Update-DR
    /// to Run-Test/Idle.
    pub fn update_dr(&mut self, exit1_reached: bool) {
        if !exit1_reached {
            self.write_tms(&[true]);
        }

        self.write_tms(&[true, false]);
    }

    /// Stay in Run-Test/Idle for `cycles` clocks.
    pub fn idle(&mut self, cycles: u32) {
        for _ in 0..cycles {
            self.tick(false, false);
        }
    }

    /// Select `instruction`, shift `data` through its data register and
    /// return the captured bits.
    pub fn write_register(&mut self, instruction: JtagInstruction, data: &BitSlice<u8>) -> BitVec<u8> {
        tracing::trace!("write_register({:?}, {} bits)", instruction, data.len());

        self.set_ir(instruction);
        self.shift_dr();
        let captured = self.readwrite_bits(data, true);
        self.update_dr(true);

        captured
    }

    /// Read `len` bits of the data register selected by `instruction`,
    /// shifting in zeros.
    pub fn read_register(&mut self, instruction: JtagInstruction, len: u32) -> BitVec<u8> {
        let zeros = bitvec![u8, Lsb0; 0; len as usize];
        self.write_register(instruction, &zeros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    /// Records every TCK rising edge as (tms, tdi) and echoes TDI on TDO one
    /// clock later.
    #[derive(Debug, Default)]
    struct RecordingPins {
        tck: bool,
        tms: bool,
        tdi: bool,
        trst_n: bool,
        tdo: bool,
        last_tck: bool,
        edges: Vec<(bool, bool)>,
        trst_edges: usize,
    }

    impl JtagPins for RecordingPins {
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
            if self.tck && !self.last_tck {
                if self.trst_n {
                    self.edges.push((self.tms, self.tdi));
                } else {
                    self.trst_edges += 1;
                }
                self.tdo = self.tdi;
            }
            self.last_tck = self.tck;
        }
    }

    fn tms_of(pins: &RecordingPins) -> Vec<bool> {
        pins.edges.iter().map(|(tms, _)| *tms).collect()
    }

    #[test]
    fn set_ir_walks_to_shift_ir_and_back() {
        let mut adapter = JtagAdapter::new(RecordingPins::default(), 2);
        adapter.pins_mut().set_trst_n(true);

        adapter.set_ir(JtagInstruction::DmiAccess);

        let pins = adapter.pins();
        assert_eq!(
            tms_of(pins),
            vec![true, true, false, false, false, false, false, false, true, true, false]
        );

        let tdis: Vec<bool> = pins.edges[4..9].iter().map(|(_, tdi)| *tdi).collect();
        assert_eq!(tdis, vec![true, false, false, false, true]);
    }

    #[test]
    fn set_ir_is_cached() {
        let mut adapter = JtagAdapter::new(RecordingPins::default(), 1);
        adapter.pins_mut().set_trst_n(true);

        adapter.set_ir(JtagInstruction::IdCode);
        let after_first = adapter.scan_stats();
        adapter.set_ir(JtagInstruction::IdCode);

        assert_eq!(adapter.scan_stats(), after_first);
        assert_eq!(after_first.ir_scans, 1);
    }

    #[test]
    fn resets_invalidate_ir_cache() {
        let mut adapter = JtagAdapter::new(RecordingPins::default(), 1);

        adapter.reset();
        adapter.set_ir(JtagInstruction::Dtmcs);
        adapter.softreset();
        assert_eq!(adapter.cached_ir(), None);

        adapter.set_ir(JtagInstruction::Dtmcs);
        adapter.reset();
        assert_eq!(adapter.cached_ir(), None);
        assert_eq!(adapter.pins().trst_edges, 4);
    }

    #[test]
    fn softreset_tms_sequence() {
        let mut adapter = JtagAdapter::new(RecordingPins::default(), 1);

        adapter.softreset();

        assert_eq!(
            tms_of(adapter.pins()),
            vec![true, true, true, true, true, false]
        );
    }

    #[test]
    fn update_dr_adds_exit_clock_when_needed() {
        let mut adapter = JtagAdapter::new(RecordingPins::default(), 1);
        adapter.pins_mut().set_trst_n(true);

        adapter.update_dr(false);
        assert_eq!(tms_of(adapter.pins()), vec![true, true, false]);

        adapter.pins_mut().edges.clear();
        adapter.update_dr(true);
        assert_eq!(tms_of(adapter.pins()), vec![true, false]);
    }

    #[test]
    fn readwrite_raises_tms_on_last_bit_only() {
        let mut adapter = JtagAdapter::new(RecordingPins::default(), 1);
        adapter.pins_mut().set_trst_n(true);

        adapter.write_word(0b1011, 4, true);

        assert_eq!(
            adapter.pins().edges,
            vec![(false, true), (false, true), (false, false), (true, true)]
        );
    }

    #[test]
    fn readwrite_word_samples_tdo() {
        let mut adapter = JtagAdapter::new(RecordingPins::default(), 1);
        adapter.pins_mut().set_trst_n(true);

        // The recording pins echo the previous TDI, so the result is the
        // input shifted up by one bit.
        let out = adapter.readwrite_word(0b0110, 4, false);
        assert_eq!(out, 0b1100);
        assert_eq!(adapter.scan_stats().tck_cycles, 4);
    }

    #[test_case(0 => panics "does not fit a word"; "empty")]
    #[test_case(65 => panics "does not fit a word"; "too long")]
    fn write_word_rejects_bad_length(len: u32) {
        let mut adapter = JtagAdapter::new(RecordingPins::default(), 1);
        adapter.pins_mut().set_trst_n(true);

        adapter.write_word(0, len, true);
    }
}
