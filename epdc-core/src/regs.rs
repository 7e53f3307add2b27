//! Controller register map
//!
//! Offsets and field layouts of the update-related registers. Timing and
//! panel setup registers are owned by board bring-up code and not listed.

/// Processing buffer address the execution unit reads from
pub const UPD_ADDR: u32 = 0x100;
/// Update origin, `top << 16 | left`
pub const UPD_CORD: u32 = 0x120;
/// Update size, `height << 16 | width`
pub const UPD_SIZE: u32 = 0x140;
/// Update control, writing it starts the update
pub const UPD_CTRL: u32 = 0x160;
/// Fixed-pixel values for fill updates
pub const UPD_FIXED: u32 = 0x180;
/// Temperature range index for the next update
pub const TEMP: u32 = 0x1A0;
/// Interrupt enable mask
pub const IRQ_MASK: u32 = 0x400;
/// Raw interrupt status
pub const IRQ: u32 = 0x440;
/// Write-one-to-clear interrupt acknowledge
pub const IRQ_CLEAR: u32 = 0x448;
/// Busy bit per execution unit
pub const STATUS_LUTS: u32 = 0x480;
/// Unit the hardware would pick next
pub const STATUS_NEXTLUT: u32 = 0x4A0;
/// Units the last working-buffer pass collided with
pub const STATUS_COL: u32 = 0x4C0;
/// Engine status
pub const STATUS: u32 = 0x4E0;

/// Per-unit completion bits occupy the low 16 bits of the IRQ registers
pub const IRQ_LUT_MASK: u32 = 0xFFFF;
pub const IRQ_WB_CMPLT: u32 = 1 << 16;
pub const IRQ_LUT_COL: u32 = 1 << 17;
pub const IRQ_TCE_UNDERRUN: u32 = 1 << 18;
pub const IRQ_FRAME_END: u32 = 1 << 19;

pub const UPD_CTRL_UPDATE_FULL: u32 = 1 << 0;
pub const UPD_CTRL_WAVEFORM_SHIFT: u32 = 8;
pub const UPD_CTRL_WAVEFORM_MASK: u32 = 0xFF << UPD_CTRL_WAVEFORM_SHIFT;
pub const UPD_CTRL_LUT_SHIFT: u32 = 16;
pub const UPD_CTRL_LUT_MASK: u32 = 0xF << UPD_CTRL_LUT_SHIFT;
pub const UPD_CTRL_USE_FIXED: u32 = 1 << 31;

pub const UPD_FIXED_FIXCP_SHIFT: u32 = 0;
pub const UPD_FIXED_FIXNP_SHIFT: u32 = 8;
pub const UPD_FIXED_FIXCP_EN: u32 = 1 << 30;
pub const UPD_FIXED_FIXNP_EN: u32 = 1 << 31;

pub const STATUS_WB_BUSY: u32 = 1 << 8;

/// Encode the update origin register
pub fn cord(left: u32, top: u32) -> u32 {
    ((top & 0xFFFF) << 16) | (left & 0xFFFF)
}

/// Encode the update size register
pub fn size(width: u32, height: u32) -> u32 {
    ((height & 0xFFFF) << 16) | (width & 0xFFFF)
}

/// Encode the update control register
pub fn upd_ctrl(unit: usize, waveform: u8, full: bool, use_fixed: bool) -> u32 {
    let mut value = ((unit as u32) << UPD_CTRL_LUT_SHIFT) & UPD_CTRL_LUT_MASK;
    value |= (waveform as u32) << UPD_CTRL_WAVEFORM_SHIFT;
    if full {
        value |= UPD_CTRL_UPDATE_FULL;
    }
    if use_fixed {
        value |= UPD_CTRL_USE_FIXED;
    }
    value
}

/// Encode a fixed next-pixel value
pub fn fixed_next_pixel(value: u8) -> u32 {
    UPD_FIXED_FIXNP_EN | ((value as u32) << UPD_FIXED_FIXNP_SHIFT)
}

/// Unit index selected in an update control value
pub fn ctrl_unit(ctrl: u32) -> usize {
    ((ctrl & UPD_CTRL_LUT_MASK) >> UPD_CTRL_LUT_SHIFT) as usize
}

/// Waveform index selected in an update control value
pub fn ctrl_waveform(ctrl: u32) -> u8 {
    ((ctrl & UPD_CTRL_WAVEFORM_MASK) >> UPD_CTRL_WAVEFORM_SHIFT) as u8
}
