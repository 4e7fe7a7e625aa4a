//! THUMB-state instruction execution: the 19 formats, dispatched on
//! the top bits of the 16-bit opcode.

use super::shifter;
use super::{Cpu, StepOutcome};
use crate::bus::Bus;
use crate::cpu::flags;

pub fn execute(cpu: &mut Cpu, bus: &mut Bus, opcode: u16) -> (u64, StepOutcome) {
    let op = opcode;
    match op >> 13 {
        0b000 => {
            if (op >> 11) & 0x3 == 0x3 {
                add_sub(cpu, op)
            } else {
                move_shifted(cpu, op)
            }
        }
        0b001 => immediate_alu(cpu, op),
        0b010 => match (op >> 10) & 0x7 {
            0b000 => alu_operation(cpu, op),
            0b001 => hi_register_or_bx(cpu, bus, op),
            _ => {
                if op & (1 << 11) != 0 {
                    pc_relative_load(cpu, bus, op)
                } else if op & (1 << 9) != 0 {
                    load_store_sign_extended(cpu, bus, op)
                } else {
                    load_store_register_offset(cpu, bus, op)
                }
            }
        },
        0b011 => load_store_immediate_offset(cpu, bus, op),
        0b100 => {
            if op & (1 << 12) != 0 {
                sp_relative_load_store(cpu, bus, op)
            } else {
                load_store_halfword(cpu, bus, op)
            }
        }
        0b101 => {
            if op & (1 << 12) != 0 {
                push_pop_or_misc(cpu, bus, op)
            } else {
                load_address(cpu, op)
            }
        }
        0b110 => {
            if op & (1 << 12) != 0 {
                if (op >> 8) & 0xF == 0xF {
                    software_interrupt(cpu, bus)
                } else {
                    conditional_branch(cpu, op)
                }
            } else {
                multiple_load_store(cpu, bus, op)
            }
        }
        0b111 => {
            if op & (1 << 12) == 0 {
                unconditional_branch(cpu, op)
            } else {
                long_branch_link(cpu, op)
            }
        }
        _ => (1, StepOutcome::UndefinedThumb(op)),
    }
}

fn move_shifted(cpu: &mut Cpu, op: u16) -> (u64, StepOutcome) {
    let shift_type = ((op >> 11) & 0x3) as u32;
    let amount = ((op >> 6) & 0x1F) as u32;
    let rs = ((op >> 3) & 0x7) as usize;
    let rd = (op & 0x7) as usize;
    let (result, carry) = shifter::shift(cpu.r[rs], shift_type, amount, cpu.c_flag(), false);
    cpu.r[rd] = result;
    cpu.set_nz(result);
    cpu.set_flag(flags::C, carry);
    (1, StepOutcome::Normal)
}

fn add_sub(cpu: &mut Cpu, op: u16) -> (u64, StepOutcome) {
    let immediate = op & (1 << 10) != 0;
    let subtract = op & (1 << 9) != 0;
    let rn_or_imm = ((op >> 6) & 0x7) as u32;
    let rs = ((op >> 3) & 0x7) as usize;
    let rd = (op & 0x7) as usize;
    let operand = if immediate { rn_or_imm } else { cpu.r[rn_or_imm as usize] };
    let rs_val = cpu.r[rs];
    let (result, carry, overflow) = if subtract {
        let (r, b) = rs_val.overflowing_sub(operand);
        let v = ((rs_val ^ operand) & (rs_val ^ r)) & 0x8000_0000 != 0;
        (r, !b, v)
    } else {
        let (r, c) = rs_val.overflowing_add(operand);
        let v = ((rs_val ^ r) & (operand ^ r)) & 0x8000_0000 != 0;
        (r, c, v)
    };
    cpu.r[rd] = result;
    cpu.set_nz(result);
    cpu.set_flag(flags::C, carry);
    cpu.set_flag(flags::V, overflow);
    (1, StepOutcome::Normal)
}

fn immediate_alu(cpu: &mut Cpu, op: u16) -> (u64, StepOutcome) {
    let kind = (op >> 11) & 0x3;
    let rd = ((op >> 8) & 0x7) as usize;
    let imm = (op & 0xFF) as u32;
    let rd_val = cpu.r[rd];
    match kind {
        0 => {
            cpu.r[rd] = imm;
            cpu.set_nz(imm);
        }
        1 => {
            let (r, b) = rd_val.overflowing_sub(imm);
            let v = ((rd_val ^ imm) & (rd_val ^ r)) & 0x8000_0000 != 0;
            cpu.set_nz(r);
            cpu.set_flag(flags::C, !b);
            cpu.set_flag(flags::V, v);
        }
        2 => {
            let (r, c) = rd_val.overflowing_add(imm);
            let v = ((rd_val ^ r) & (imm ^ r)) & 0x8000_0000 != 0;
            cpu.r[rd] = r;
            cpu.set_nz(r);
            cpu.set_flag(flags::C, c);
            cpu.set_flag(flags::V, v);
        }
        3 => {
            let (r, b) = rd_val.overflowing_sub(imm);
            let v = ((rd_val ^ imm) & (rd_val ^ r)) & 0x8000_0000 != 0;
            cpu.r[rd] = r;
            cpu.set_nz(r);
            cpu.set_flag(flags::C, !b);
            cpu.set_flag(flags::V, v);
        }
        _ => unreachable!(),
    }
    (1, StepOutcome::Normal)
}

fn alu_operation(cpu: &mut Cpu, op: u16) -> (u64, StepOutcome) {
    let kind = (op >> 6) & 0xF;
    let rs = ((op >> 3) & 0x7) as usize;
    let rd = (op & 0x7) as usize;
    let rd_val = cpu.r[rd];
    let rs_val = cpu.r[rs];
    let carry_in = cpu.c_flag();

    match kind {
        0x0 => { let r = rd_val & rs_val; cpu.r[rd] = r; cpu.set_nz(r); }
        0x1 => { let r = rd_val ^ rs_val; cpu.r[rd] = r; cpu.set_nz(r); }
        0x2 => {
            let (r, c) = shifter::shift(rd_val, 0, rs_val & 0xFF, carry_in, true);
            cpu.r[rd] = r; cpu.set_nz(r); cpu.set_flag(flags::C, c);
        }
        0x3 => {
            let (r, c) = shifter::shift(rd_val, 1, rs_val & 0xFF, carry_in, true);
            cpu.r[rd] = r; cpu.set_nz(r); cpu.set_flag(flags::C, c);
        }
        0x4 => {
            let (r, c) = shifter::shift(rd_val, 2, rs_val & 0xFF, carry_in, true);
            cpu.r[rd] = r; cpu.set_nz(r); cpu.set_flag(flags::C, c);
        }
        0x5 => {
            let (r1, c1) = rd_val.overflowing_add(rs_val);
            let (r, c2) = r1.overflowing_add(carry_in as u32);
            let v = ((rd_val ^ r) & (rs_val ^ r)) & 0x8000_0000 != 0;
            cpu.r[rd] = r; cpu.set_nz(r); cpu.set_flag(flags::C, c1 || c2); cpu.set_flag(flags::V, v);
        }
        0x6 => {
            let borrow_in = !carry_in as u32;
            let (r1, b1) = rd_val.overflowing_sub(rs_val);
            let (r, b2) = r1.overflowing_sub(borrow_in);
            let v = ((rd_val ^ rs_val) & (rd_val ^ r)) & 0x8000_0000 != 0;
            cpu.r[rd] = r; cpu.set_nz(r); cpu.set_flag(flags::C, !(b1 || b2)); cpu.set_flag(flags::V, v);
        }
        0x7 => {
            let (r, c) = shifter::shift(rd_val, 3, rs_val & 0xFF, carry_in, true);
            cpu.r[rd] = r; cpu.set_nz(r); cpu.set_flag(flags::C, c);
        }
        0x8 => { let r = rd_val & rs_val; cpu.set_nz(r); }
        0x9 => {
            let (r, b) = 0u32.overflowing_sub(rs_val);
            let v = ((0u32 ^ rs_val) & (0u32 ^ r)) & 0x8000_0000 != 0;
            cpu.r[rd] = r; cpu.set_nz(r); cpu.set_flag(flags::C, !b); cpu.set_flag(flags::V, v);
        }
        0xA => {
            let (r, b) = rd_val.overflowing_sub(rs_val);
            let v = ((rd_val ^ rs_val) & (rd_val ^ r)) & 0x8000_0000 != 0;
            cpu.set_nz(r); cpu.set_flag(flags::C, !b); cpu.set_flag(flags::V, v);
        }
        0xB => {
            let (r, c) = rd_val.overflowing_add(rs_val);
            let v = ((rd_val ^ r) & (rs_val ^ r)) & 0x8000_0000 != 0;
            cpu.set_nz(r); cpu.set_flag(flags::C, c); cpu.set_flag(flags::V, v);
        }
        0xC => { let r = rd_val | rs_val; cpu.r[rd] = r; cpu.set_nz(r); }
        0xD => { let r = rd_val.wrapping_mul(rs_val); cpu.r[rd] = r; cpu.set_nz(r); }
        0xE => { let r = rd_val & !rs_val; cpu.r[rd] = r; cpu.set_nz(r); }
        0xF => { let r = !rs_val; cpu.r[rd] = r; cpu.set_nz(r); }
        _ => unreachable!(),
    }
    (1, StepOutcome::Normal)
}

fn hi_register_or_bx(cpu: &mut Cpu, bus: &mut Bus, op: u16) -> (u64, StepOutcome) {
    let op_kind = (op >> 8) & 0x3;
    let h1 = op & (1 << 7) != 0;
    let h2 = op & (1 << 6) != 0;
    let rs = ((op >> 3) & 0x7) as u32 + if h2 { 8 } else { 0 };
    let rd = (op & 0x7) as u32 + if h1 { 8 } else { 0 };

    match op_kind {
        0 => {
            let result = cpu.get_reg(rd).wrapping_add(cpu.get_reg(rs));
            if rd == 15 { cpu.r[15] = result & !1; } else { cpu.r[rd as usize] = result; }
        }
        1 => {
            let a = cpu.get_reg(rd);
            let b = cpu.get_reg(rs);
            let (r, borrow) = a.overflowing_sub(b);
            let v = ((a ^ b) & (a ^ r)) & 0x8000_0000 != 0;
            cpu.set_nz(r);
            cpu.set_flag(flags::C, !borrow);
            cpu.set_flag(flags::V, v);
        }
        2 => {
            let value = cpu.get_reg(rs);
            if rd == 15 { cpu.r[15] = value & !1; } else { cpu.r[rd as usize] = value; }
        }
        3 => {
            let target = cpu.get_reg(rs);
            if target & 1 != 0 {
                cpu.cpsr |= flags::THUMB;
                cpu.r[15] = target & !1;
            } else {
                cpu.cpsr &= !flags::THUMB;
                cpu.r[15] = target & !3;
            }
            let _ = bus;
        }
        _ => unreachable!(),
    }
    (1, StepOutcome::Normal)
}

fn pc_relative_load(cpu: &mut Cpu, bus: &mut Bus, op: u16) -> (u64, StepOutcome) {
    let rd = ((op >> 8) & 0x7) as usize;
    let imm = (op & 0xFF) as u32 * 4;
    let base = cpu.pc_operand() & !3;
    let (value, cycles) = bus.read::<u32>(base.wrapping_add(imm), false);
    cpu.r[rd] = value;
    (1 + cycles, StepOutcome::Normal)
}

fn load_store_register_offset(cpu: &mut Cpu, bus: &mut Bus, op: u16) -> (u64, StepOutcome) {
    let load = op & (1 << 11) != 0;
    let byte = op & (1 << 10) != 0;
    let ro = ((op >> 6) & 0x7) as usize;
    let rb = ((op >> 3) & 0x7) as usize;
    let rd = (op & 0x7) as usize;
    let addr = cpu.r[rb].wrapping_add(cpu.r[ro]);
    let mut cycles = 1;
    if load {
        let value = if byte {
            let (v, c) = bus.read::<u8>(addr, false);
            cycles += c;
            v as u32
        } else {
            let (v, c) = bus.read::<u32>(addr & !3, false);
            cycles += c;
            v.rotate_right((addr & 3) * 8)
        };
        cpu.r[rd] = value;
    } else if byte {
        cycles += bus.write::<u8>(addr, cpu.r[rd] as u8, false);
    } else {
        cycles += bus.write::<u32>(addr, cpu.r[rd], false);
    }
    (cycles, StepOutcome::Normal)
}

fn load_store_sign_extended(cpu: &mut Cpu, bus: &mut Bus, op: u16) -> (u64, StepOutcome) {
    let h_bit = op & (1 << 11) != 0;
    let sign_extend = op & (1 << 10) != 0;
    let ro = ((op >> 6) & 0x7) as usize;
    let rb = ((op >> 3) & 0x7) as usize;
    let rd = (op & 0x7) as usize;
    let addr = cpu.r[rb].wrapping_add(cpu.r[ro]);

    let mut cycles = 1;
    match (sign_extend, h_bit) {
        (false, false) => {
            cycles += bus.write::<u16>(addr & !1, cpu.r[rd] as u16, false);
        }
        (false, true) => {
            let (v, c) = bus.read::<u16>(addr & !1, false);
            cycles += c;
            cpu.r[rd] = if addr & 1 != 0 { (v as u32).rotate_right(8) } else { v as u32 };
        }
        (true, false) => {
            let (v, c) = bus.read::<u8>(addr, false);
            cycles += c;
            cpu.r[rd] = v as i8 as i32 as u32;
        }
        (true, true) => {
            let value = if addr & 1 != 0 {
                let (v, c) = bus.read::<u8>(addr, false);
                cycles += c;
                v as i8 as i32 as u32
            } else {
                let (v, c) = bus.read::<u16>(addr, false);
                cycles += c;
                v as i16 as i32 as u32
            };
            cpu.r[rd] = value;
        }
    }
    (cycles, StepOutcome::Normal)
}

fn load_store_immediate_offset(cpu: &mut Cpu, bus: &mut Bus, op: u16) -> (u64, StepOutcome) {
    let byte = op & (1 << 12) != 0;
    let load = op & (1 << 11) != 0;
    let imm = ((op >> 6) & 0x1F) as u32;
    let rb = ((op >> 3) & 0x7) as usize;
    let rd = (op & 0x7) as usize;
    let offset = if byte { imm } else { imm * 4 };
    let addr = cpu.r[rb].wrapping_add(offset);

    let mut cycles = 1;
    if load {
        let value = if byte {
            let (v, c) = bus.read::<u8>(addr, false);
            cycles += c;
            v as u32
        } else {
            let (v, c) = bus.read::<u32>(addr & !3, false);
            cycles += c;
            v.rotate_right((addr & 3) * 8)
        };
        cpu.r[rd] = value;
    } else if byte {
        cycles += bus.write::<u8>(addr, cpu.r[rd] as u8, false);
    } else {
        cycles += bus.write::<u32>(addr, cpu.r[rd], false);
    }
    (cycles, StepOutcome::Normal)
}

fn load_store_halfword(cpu: &mut Cpu, bus: &mut Bus, op: u16) -> (u64, StepOutcome) {
    let load = op & (1 << 11) != 0;
    let imm = ((op >> 6) & 0x1F) as u32 * 2;
    let rb = ((op >> 3) & 0x7) as usize;
    let rd = (op & 0x7) as usize;
    let addr = cpu.r[rb].wrapping_add(imm);

    let mut cycles = 1;
    if load {
        let (v, c) = bus.read::<u16>(addr & !1, false);
        cycles += c;
        cpu.r[rd] = if addr & 1 != 0 { (v as u32).rotate_right(8) } else { v as u32 };
    } else {
        cycles += bus.write::<u16>(addr & !1, cpu.r[rd] as u16, false);
    }
    (cycles, StepOutcome::Normal)
}

fn sp_relative_load_store(cpu: &mut Cpu, bus: &mut Bus, op: u16) -> (u64, StepOutcome) {
    let load = op & (1 << 11) != 0;
    let rd = ((op >> 8) & 0x7) as usize;
    let imm = (op & 0xFF) as u32 * 4;
    let addr = cpu.r[13].wrapping_add(imm);

    let mut cycles = 1;
    if load {
        let (v, c) = bus.read::<u32>(addr & !3, false);
        cycles += c;
        cpu.r[rd] = v.rotate_right((addr & 3) * 8);
    } else {
        cycles += bus.write::<u32>(addr, cpu.r[rd], false);
    }
    (cycles, StepOutcome::Normal)
}

fn load_address(cpu: &mut Cpu, op: u16) -> (u64, StepOutcome) {
    let use_sp = op & (1 << 11) != 0;
    let rd = ((op >> 8) & 0x7) as usize;
    let imm = (op & 0xFF) as u32 * 4;
    let base = if use_sp { cpu.r[13] } else { cpu.pc_operand() & !3 };
    cpu.r[rd] = base.wrapping_add(imm);
    (1, StepOutcome::Normal)
}

fn push_pop_or_misc(cpu: &mut Cpu, bus: &mut Bus, op: u16) -> (u64, StepOutcome) {
    if (op >> 9) & 0x3 == 0x2 {
        let imm = ((op & 0x7F) as u32) * 4;
        if op & (1 << 7) != 0 {
            cpu.r[13] = cpu.r[13].wrapping_sub(imm);
        } else {
            cpu.r[13] = cpu.r[13].wrapping_add(imm);
        }
        return (1, StepOutcome::Normal);
    }

    let pop = op & (1 << 11) != 0;
    let store_lr_or_load_pc = op & (1 << 8) != 0;
    let reg_list = op & 0xFF;

    let mut cycles = 1;
    if pop {
        let mut addr = cpu.r[13];
        for i in 0..8 {
            if reg_list & (1 << i) != 0 {
                let (v, c) = bus.read::<u32>(addr, true);
                cycles += c;
                cpu.r[i] = v;
                addr = addr.wrapping_add(4);
            }
        }
        if store_lr_or_load_pc {
            let (v, c) = bus.read::<u32>(addr, true);
            cycles += c;
            cpu.r[15] = v & !1;
            addr = addr.wrapping_add(4);
        }
        cpu.r[13] = addr;
    } else {
        let count = reg_list.count_ones() + if store_lr_or_load_pc { 1 } else { 0 };
        let mut addr = cpu.r[13].wrapping_sub(count * 4);
        cpu.r[13] = addr;
        for i in 0..8 {
            if reg_list & (1 << i) != 0 {
                cycles += bus.write::<u32>(addr, cpu.r[i], true);
                addr = addr.wrapping_add(4);
            }
        }
        if store_lr_or_load_pc {
            cycles += bus.write::<u32>(addr, cpu.r[14], true);
        }
    }
    (cycles, StepOutcome::Normal)
}

fn multiple_load_store(cpu: &mut Cpu, bus: &mut Bus, op: u16) -> (u64, StepOutcome) {
    let load = op & (1 << 11) != 0;
    let rb = ((op >> 8) & 0x7) as usize;
    let reg_list = op & 0xFF;
    let mut addr = cpu.r[rb];

    let mut cycles = 1;
    for i in 0..8 {
        if reg_list & (1 << i) != 0 {
            if load {
                let (v, c) = bus.read::<u32>(addr, true);
                cycles += c;
                cpu.r[i] = v;
            } else {
                cycles += bus.write::<u32>(addr, cpu.r[i], true);
            }
            addr = addr.wrapping_add(4);
        }
    }
    cpu.r[rb] = addr;
    (cycles, StepOutcome::Normal)
}

fn conditional_branch(cpu: &mut Cpu, op: u16) -> (u64, StepOutcome) {
    let cond = ((op >> 8) & 0xF) as u32;
    if !flags::condition_passes(cond, cpu.cpsr) {
        return (1, StepOutcome::Normal);
    }
    let offset = ((op & 0xFF) as i8 as i32) * 2;
    cpu.r[15] = cpu.pc_operand().wrapping_add(offset as u32);
    (1, StepOutcome::Normal)
}

fn software_interrupt(cpu: &mut Cpu, bus: &mut Bus) -> (u64, StepOutcome) {
    cpu.enter_swi(bus);
    (3, StepOutcome::Normal)
}

fn unconditional_branch(cpu: &mut Cpu, op: u16) -> (u64, StepOutcome) {
    let offset = (((op & 0x7FF) as i32) << 21 >> 20) as i32;
    cpu.r[15] = cpu.pc_operand().wrapping_add(offset as u32);
    (1, StepOutcome::Normal)
}

fn long_branch_link(cpu: &mut Cpu, op: u16) -> (u64, StepOutcome) {
    let low = op & (1 << 11) != 0;
    let offset = (op & 0x7FF) as u32;
    if !low {
        let signed = ((offset << 21) as i32 >> 9) as u32;
        cpu.r[14] = cpu.pc_operand().wrapping_add(signed);
    } else {
        let next_instr = cpu.r[15].wrapping_add(2);
        let target = cpu.r[14].wrapping_add(offset << 1);
        cpu.r[15] = target;
        cpu.r[14] = next_instr | 1;
    }
    (1, StepOutcome::Normal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;

    #[test]
    fn move_immediate_sets_register_and_flags() {
        let mut cpu = Cpu::new();
        // MOV r0, #0
        let op: u16 = 0b001_00_000_00000000;
        immediate_alu(&mut cpu, op);
        assert_eq!(cpu.r[0], 0);
        assert!(cpu.z_flag());
    }

    #[test]
    fn add_sub_register_form_computes_sum() {
        let mut cpu = Cpu::new();
        cpu.r[1] = 10;
        cpu.r[2] = 5;
        // ADD r0, r1, r2
        let op: u16 = 0b000_11_00_010_001_000;
        add_sub(&mut cpu, op);
        assert_eq!(cpu.r[0], 15);
    }

    #[test]
    fn bx_switches_to_arm_when_target_bit0_clear() {
        let mut cpu = Cpu::new();
        let mut bus = Bus::new();
        cpu.cpsr |= flags::THUMB;
        cpu.r[1] = 0x1000;
        // BX r1 (H1=0,H2=0,op=3,Rs=1)
        let op: u16 = 0b010001_11_0_001_000;
        hi_register_or_bx(&mut cpu, &mut bus, op);
        assert!(!cpu.thumb());
        assert_eq!(cpu.r[15], 0x1000);
    }
}
