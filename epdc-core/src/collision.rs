//! Execution unit table and collision masks
//!
//! Each busy unit remembers the panel region it is driving and the order
//! of the update it runs. A queued update that overlaps a busy unit must
//! wait for that unit, tracked as a bit in its collision mask.

use crate::geometry::Rect;
use crate::pool::BufferId;

/// Number of hardware execution units
pub const NUM_UNITS: usize = 16;

/// Index of the last unit, which the controller prefers not to use alone
pub const LAST_UNIT: usize = NUM_UNITS - 1;

/// Set of execution units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UnitMask(u16);

impl UnitMask {
    pub const EMPTY: UnitMask = UnitMask(0);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub fn single(unit: usize) -> Self {
        Self(1 << unit)
    }

    pub fn with(self, unit: usize) -> Self {
        Self(self.0 | (1 << unit))
    }

    pub fn without(self, unit: usize) -> Self {
        Self(self.0 & !(1 << unit))
    }

    pub fn contains(self, unit: usize) -> bool {
        self.0 & (1 << unit) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn union(self, other: UnitMask) -> Self {
        Self(self.0 | other.0)
    }

    pub fn difference(self, other: UnitMask) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn intersection(self, other: UnitMask) -> Self {
        Self(self.0 & other.0)
    }

    /// Units in ascending order
    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..NUM_UNITS).filter(move |&u| self.contains(u))
    }
}

/// Record of an occupied execution unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusyUnit {
    /// Order of the update it drives
    pub order: u32,
    /// Region in panel coordinates
    pub region: Rect,
    /// Buffer still attached, until the working buffer releases it
    pub buffer: Option<BufferId>,
    /// Engine-internal fixed-pixel draw rather than a caller update
    pub fill: bool,
}

/// Unit choice for the next programming step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UnitChoice {
    /// Unit to program, `None` if every unit is busy
    pub unit: Option<usize>,
    /// The last unit is currently busy
    pub last_busy: bool,
}

/// State of every execution unit
#[derive(Debug, Clone)]
pub struct UnitTable {
    units: [Option<BusyUnit>; NUM_UNITS],
}

impl Default for UnitTable {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitTable {
    pub fn new() -> Self {
        Self {
            units: [None; NUM_UNITS],
        }
    }

    pub fn get(&self, unit: usize) -> Option<&BusyUnit> {
        self.units.get(unit).and_then(|u| u.as_ref())
    }

    pub fn get_mut(&mut self, unit: usize) -> Option<&mut BusyUnit> {
        self.units.get_mut(unit).and_then(|u| u.as_mut())
    }

    pub fn is_busy(&self, unit: usize) -> bool {
        self.get(unit).is_some()
    }

    pub fn busy_mask(&self) -> UnitMask {
        let mut mask = UnitMask::EMPTY;
        for (i, u) in self.units.iter().enumerate() {
            if u.is_some() {
                mask = mask.with(i);
            }
        }
        mask
    }

    pub fn any_busy(&self) -> bool {
        self.units.iter().any(|u| u.is_some())
    }

    /// Mark a unit busy
    ///
    /// A unit drives one update at a time; occupying a busy unit replaces
    /// nothing and returns false.
    pub fn occupy(&mut self, unit: usize, busy: BusyUnit) -> bool {
        match self.units.get_mut(unit) {
            Some(slot) if slot.is_none() => {
                *slot = Some(busy);
                true
            }
            _ => false,
        }
    }

    /// Mark a unit idle, returning what it was running
    pub fn retire(&mut self, unit: usize) -> Option<BusyUnit> {
        self.units.get_mut(unit).and_then(|u| u.take())
    }

    /// Busy units whose panel region overlaps `region`
    pub fn overlapping(&self, region: &Rect) -> UnitMask {
        let mut mask = UnitMask::EMPTY;
        for (i, u) in self.units.iter().enumerate() {
            if let Some(busy) = u {
                if busy.region.overlaps(region) {
                    mask = mask.with(i);
                }
            }
        }
        mask
    }

    /// True if any busy unit in `mask` runs an update at least as new as `order`
    pub fn any_newer_or_equal(&self, mask: UnitMask, order: u32) -> bool {
        mask.iter()
            .filter_map(|u| self.get(u))
            .any(|busy| busy.order >= order)
    }

    /// Pick the unit to program next
    ///
    /// Units are handed out in ascending order above the highest busy one,
    /// wrapping to the lowest idle unit once the top is reached.
    pub fn choose_next(&self) -> UnitChoice {
        let busy = self.busy_mask().bits();
        let last_busy = busy & (1 << LAST_UNIT) != 0;

        let above_highest = (u16::BITS - busy.leading_zeros()) as usize;
        let unit = if above_highest <= LAST_UNIT {
            Some(above_highest)
        } else {
            let first_idle = (!busy).trailing_zeros() as usize;
            (first_idle < NUM_UNITS).then_some(first_idle)
        };

        UnitChoice { unit, last_busy }
    }
}
