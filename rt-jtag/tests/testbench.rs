use std::path::PathBuf;

use object::write::Object as WriteObject;
use object::{Architecture, BinaryFormat, Endianness, SectionKind};
use pretty_assertions::assert_eq;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rt_jtag::architecture::riscv::dtm::decode_dmi_response;
use rt_jtag::architecture::riscv::{Data0, DebugRegister};
use rt_jtag::probe::fake_dut::TapState;
use rt_jtag::{
    Error, FakeDut, FileDownloadError, JtagInstruction, MemoryTestConfig, Testbench,
    TestbenchConfig,
};
use test_case::test_case;

fn init_logging() {
    let _ = pretty_env_logger::try_init();
}

fn testbench(dut: FakeDut) -> Testbench<FakeDut> {
    init_logging();

    let mut testbench = Testbench::new(dut, TestbenchConfig::default()).unwrap();
    testbench
        .jtag_init()
        .expect("Failed to bring up the fake debug port.");
    testbench
}

/// Write a relocatable RISC-V object with a `.text` section to a temporary file.
fn write_elf(name: &str, text: &[u8]) -> PathBuf {
    let mut image = WriteObject::new(BinaryFormat::Elf, Architecture::Riscv32, Endianness::Little);
    let section = image.add_section(vec![], b".text".to_vec(), SectionKind::Text);
    image.append_section_data(section, text, 4);

    let path = std::env::temp_dir().join(format!("rt-jtag-{}-{name}.elf", std::process::id()));
    std::fs::write(&path, image.write().unwrap()).unwrap();
    path
}

#[test]
fn connectivity_test_passes() {
    init_logging();
    let mut testbench = Testbench::new(FakeDut::new(), TestbenchConfig::default()).unwrap();

    let report = testbench.connectivity_test();

    assert!(report.bypass_passed);
    assert!(report.idcode_matches);
    assert_eq!(report.idcode.0, 0xFEED_C0D3);
    assert!(report.passed());
    assert_eq!(testbench.pins().tap_state(), TapState::RunTestIdle);
}

#[test]
fn wrong_idcode_is_reported_but_not_fatal() {
    init_logging();
    let mut dut = FakeDut::new();
    dut.set_idcode(0x1000_0001);
    let mut testbench = Testbench::new(dut, TestbenchConfig::default()).unwrap();

    let report = testbench.connectivity_test();
    assert!(report.bypass_passed);
    assert!(!report.idcode_matches);

    // Bring-up carries on regardless.
    testbench.jtag_init().unwrap();
}

#[test]
fn repeated_instruction_is_not_rescanned() {
    let mut testbench = testbench(FakeDut::new());
    let probe = testbench.interface_mut().probe_mut();

    probe.set_ir(JtagInstruction::Bypass);
    let before = probe.scan_stats();
    probe.set_ir(JtagInstruction::Bypass);

    assert_eq!(probe.scan_stats().ir_scans, before.ir_scans);
    assert_eq!(probe.scan_stats().tck_cycles, before.tck_cycles);
    assert_eq!(testbench.pins().ir(), JtagInstruction::Bypass.opcode());
}

#[test]
fn every_operation_returns_to_run_test_idle() {
    let mut testbench = testbench(FakeDut::new());

    let probe = testbench.interface_mut().probe_mut();
    probe.set_ir(JtagInstruction::IdCode);
    assert_eq!(probe.pins().tap_state(), TapState::RunTestIdle);

    probe.shift_dr();
    probe.write_word(0, 32, true);
    probe.update_dr(true);
    assert_eq!(probe.pins().tap_state(), TapState::RunTestIdle);

    probe.shift_dr();
    probe.write_word(0, 8, false);
    probe.update_dr(false);
    assert_eq!(probe.pins().tap_state(), TapState::RunTestIdle);

    probe.softreset();
    assert_eq!(probe.pins().tap_state(), TapState::RunTestIdle);

    probe.reset();
    assert_eq!(probe.pins().tap_state(), TapState::RunTestIdle);

    let interface = testbench.interface_mut();
    interface.dtm_mut().init().unwrap();
    interface.dtm_mut().read_dmi(Data0::ADDRESS, 8);
    assert_eq!(interface.probe().pins().tap_state(), TapState::RunTestIdle);

    interface.mm_write(0x1000_0000, 1, 10, false).unwrap();
    assert_eq!(interface.probe().pins().tap_state(), TapState::RunTestIdle);
}

#[test_case(0x0000_0000; "zero")]
#[test_case(0x0000_0001; "one")]
#[test_case(0xFFFF_FFFF; "all ones")]
#[test_case(0xA5C3_0F96; "pattern")]
fn dmi_write_then_read(value: u32) {
    let mut testbench = testbench(FakeDut::new());
    let dtm = testbench.interface_mut().dtm_mut();

    dtm.write_dmi(Data0::ADDRESS, value);

    assert_eq!(dtm.read_dmi_with_backoff(Data0::ADDRESS).unwrap(), value);
}

#[test]
fn raw_dmi_read_carries_status_and_data() {
    let mut testbench = testbench(FakeDut::new());
    let dtm = testbench.interface_mut().dtm_mut();

    dtm.write_dmi(Data0::ADDRESS, 0x1234_5678);
    let raw = dtm.read_dmi(Data0::ADDRESS, 8);

    assert_eq!(raw & 0b11, 0);
    assert_eq!(decode_dmi_response(raw), Ok(0x1234_5678));
}

#[test_case(0; "ready at once")]
#[test_case(1; "busy once")]
#[test_case(2; "busy twice")]
#[test_case(5; "busy five times")]
fn backoff_terminates(busy: u32) {
    let mut testbench = testbench(FakeDut::new());
    testbench.interface_mut().dtm_mut().write_dmi(Data0::ADDRESS, 0xC0FFEE);

    let before = testbench.pins().stats().clone();
    testbench.pins_mut().force_busy(busy);

    let value = testbench
        .interface_mut()
        .dtm_mut()
        .read_dmi_with_backoff(Data0::ADDRESS)
        .unwrap();

    let stats = testbench.pins().stats();
    let waits: Vec<u32> = (0..=busy).map(|i| 8 << i).collect();

    assert_eq!(value, 0xC0FFEE);
    assert_eq!(stats.dmi_read_requests - before.dmi_read_requests, busy + 1);
    assert_eq!(stats.dmi_resets - before.dmi_resets, busy);
    assert_eq!(stats.read_waits[before.read_waits.len()..].to_vec(), waits);
}

#[test]
fn slow_dtm_is_waited_for() {
    let mut dut = FakeDut::new();
    dut.set_dmi_latency(20);
    let mut testbench = testbench(dut);
    let before = testbench.pins().stats().clone();

    let dtm = testbench.interface_mut().dtm_mut();
    dtm.write_dmi(Data0::ADDRESS, 99);
    assert_eq!(dtm.read_dmi_with_backoff(Data0::ADDRESS).unwrap(), 99);

    // 8 and 16 cycles are too short, 32 is enough.
    let stats = testbench.pins().stats();
    assert_eq!(
        stats.read_waits[before.read_waits.len()..].to_vec(),
        vec![8, 16, 32]
    );
}

#[test]
fn sba_round_trip_over_scratch_pad() {
    let mut testbench = testbench(FakeDut::new());
    let interface = testbench.interface_mut();

    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut values = vec![0x0000_0000, 0xFFFF_FFFF];
    values.extend((0..16).map(|_| rng.gen::<u32>()));

    for value in values {
        let address = 0x1000_0000 + rng.gen_range(0..0x1000u64) * 4;

        interface.mm_write(address, value, 10, false).unwrap();
        assert_eq!(
            interface.mm_read(address, 10).unwrap(),
            value,
            "at {address:#010x}"
        );
    }
}

#[test]
fn memory_test_uses_configured_window() {
    init_logging();
    let config = TestbenchConfig {
        memory_test: MemoryTestConfig {
            base: 0x2000_0000,
            size: 0x100,
            iterations: 8,
            seed: 42,
        },
        ..TestbenchConfig::default()
    };
    let mut testbench = Testbench::new(FakeDut::new(), config).unwrap();
    testbench.jtag_init().unwrap();

    let report = testbench.memory_test().unwrap();

    assert!(report.passed());
    assert_eq!(report.accesses, 10);
    assert!(testbench
        .pins()
        .memory()
        .keys()
        .all(|address| (0x2000_0000..0x2000_0100).contains(address)));
}

#[test]
fn memory_window_without_a_word_is_rejected() {
    init_logging();
    let mut config = TestbenchConfig::default();
    config.memory_test.size = 2;

    let result = Testbench::new(FakeDut::new(), config);

    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn connectivity_test_scans_idcode_once() {
    init_logging();
    let mut testbench = Testbench::new(FakeDut::new(), TestbenchConfig::default()).unwrap();

    testbench.connectivity_test();

    // One BYPASS scan and one IDCODE scan.
    let stats = testbench.interface().probe().scan_stats();
    assert_eq!(stats.dr_scans, 2);
    assert_eq!(stats.ir_scans, 2);
}

#[test]
fn load_elf_streams_every_word() {
    let mut testbench = testbench(FakeDut::new());
    let path = write_elf("stream", &[0x13, 0x00, 0x00, 0x00, 0x6f, 0x00, 0x00]);

    let report = testbench.load_elf(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(report.sections, 1);
    assert_eq!(report.bytes, 7);
    assert_eq!(report.words, 2);
    assert_eq!(testbench.pins().stats().sbdata0_writes, 2);
    assert!(testbench.pins().hart_halted());

    // Relocatable objects are linked at address zero.
    assert_eq!(testbench.pins().memory_word(0), Some(0x0000_0013));
    assert_eq!(testbench.pins().memory_word(4), Some(0x0000_006f));
}

#[test]
fn load_and_run_resumes_the_hart() {
    let mut testbench = testbench(FakeDut::new());
    let path = write_elf("run", &[0x6f, 0x00, 0x00, 0x00]);

    testbench.load_and_run(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert!(!testbench.pins().hart_halted());
    assert_eq!(testbench.pins().dpc(), 0);
}

#[test]
fn missing_image_is_a_hard_error() {
    let mut testbench = testbench(FakeDut::new());

    let result = testbench.load_elf("/nonexistent/firmware.elf");

    assert!(matches!(
        result,
        Err(Error::FileDownload(FileDownloadError::IO(_)))
    ));
    // Nothing was touched.
    assert!(!testbench.pins().hart_halted());
    assert_eq!(testbench.pins().stats().sbdata0_writes, 0);
}

#[test]
fn configuration_from_yaml_file() {
    init_logging();
    let path = std::env::temp_dir().join(format!("rt-jtag-{}-config.yaml", std::process::id()));
    std::fs::write(&path, "initial_backoff_cycles: 4\nmax_dmi_retries: 3\n").unwrap();

    let testbench = Testbench::from_config_file(FakeDut::new(), &path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(testbench.config().initial_backoff_cycles, 4);
    assert_eq!(testbench.config().max_dmi_retries, Some(3));
    assert_eq!(testbench.config().checkpoint_bytes, 512);
}

#[test]
fn full_run() {
    init_logging();
    let mut testbench = Testbench::new(FakeDut::new(), TestbenchConfig::default()).unwrap();
    let path = write_elf("full", &[0x13, 0x05, 0x10, 0x00, 0x6f, 0x00, 0x00, 0x00]);

    let report = testbench.run(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(report.words, 2);
    assert!(!testbench.pins().hart_halted());
    assert!(testbench.tick_count() > 0);
}
