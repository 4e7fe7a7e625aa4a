//! CPU-level integration tests: register banking, pipeline refill,
//! and exception entry, as distinct from the per-instruction tests
//! that live alongside `decode_arm`/`decode_thumb`.

use crate::bus::Bus;
use crate::cpu::flags::Mode;
use crate::cpu::{Cpu, StepOutcome};

#[test]
fn reset_starts_in_system_mode_with_interrupts_disabled() {
    let cpu = Cpu::new();
    assert_eq!(cpu.mode(), Mode::System);
    assert!(!cpu.thumb());
    assert_eq!(cpu.r[13], 0x0300_7F00);
}

#[test]
fn switch_to_fiq_and_back_preserves_user_bank() {
    let mut cpu = Cpu::new();
    cpu.r[8] = 0xAAAA_AAAA;
    cpu.r[13] = 0x1111_1111;
    cpu.switch_to(Mode::Fiq);
    cpu.r[8] = 0xBBBB_BBBB;
    cpu.r[13] = 0x2222_2222;
    cpu.switch_to(Mode::System);
    assert_eq!(cpu.r[8], 0xAAAA_AAAA);
    assert_eq!(cpu.r[13], 0x1111_1111);
    cpu.switch_to(Mode::Fiq);
    assert_eq!(cpu.r[8], 0xBBBB_BBBB);
    assert_eq!(cpu.r[13], 0x2222_2222);
}

#[test]
fn svc_and_irq_each_keep_their_own_r13_bank() {
    let mut cpu = Cpu::new();
    cpu.switch_to(Mode::Supervisor);
    let svc_sp = cpu.r[13];
    cpu.switch_to(Mode::Irq);
    let irq_sp = cpu.r[13];
    assert_ne!(svc_sp, irq_sp);
    cpu.r[13] = 0xDEAD_0000;
    cpu.switch_to(Mode::Supervisor);
    assert_eq!(cpu.r[13], svc_sp);
}

#[test]
fn init_pipeline_loads_two_instructions_ahead() {
    let mut cpu = Cpu::new();
    let mut bus = Bus::new();
    bus.load_rom(&[0u8; 0x1000]).unwrap();
    cpu.init_pipeline(&mut bus);
    assert_eq!(cpu.r[15], 0);
}

#[test]
fn arm_nop_advances_pc_by_four() {
    let mut cpu = Cpu::new();
    let mut bus = Bus::new();
    bus.load_rom(&[0u8; 0x1000]).unwrap();
    cpu.cpsr &= !crate::cpu::flags::THUMB;
    cpu.init_pipeline(&mut bus);
    let start = cpu.r[15];
    // MOV r0, r0 (always-true condition, no side effects beyond r0)
    let nop: u32 = 0xE1A0_0000;
    bus.write::<u32>(start, nop, false);
    cpu.init_pipeline(&mut bus);
    let (_, outcome) = cpu.step(&mut bus);
    assert_eq!(outcome, StepOutcome::Normal);
    assert_eq!(cpu.r[15], start + 4);
}

#[test]
fn save_state_round_trips_registers_and_mode() {
    let mut cpu = Cpu::new();
    cpu.r[3] = 0x1234_5678;
    cpu.switch_to(Mode::Irq);
    cpu.r[13] = 0x0badc0de;
    let bytes = cpu.to_bytes();

    let mut restored = Cpu::new();
    restored.from_bytes(&bytes).unwrap();
    assert_eq!(restored.r[3], 0x1234_5678);
    assert_eq!(restored.mode(), Mode::Irq);
    assert_eq!(restored.r[13], 0x0badc0de);
}

#[test]
fn save_state_rejects_truncated_buffer() {
    let mut cpu = Cpu::new();
    let err = cpu.from_bytes(&[0u8; 4]).unwrap_err();
    assert!(matches!(err, crate::error::EmuError::SaveStateTooSmall { .. }));
}
