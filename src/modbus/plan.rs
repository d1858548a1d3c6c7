//! Register-plan builder.
//!
//! Pure, I/O-free: turns a slave's catalog registers into the minimum set of
//! contiguous, ≤125-register read ranges, in protocol (0-based) address
//! space.

use crate::types::{AddressStyle, Register};

const MAX_RANGE_LEN: u16 = 125;
const FORTY_THOUSAND_ONE: i32 = 40001;

/// One item placed into a read range: its protocol address, word length, and
/// a back-reference into the caller's register list.
#[derive(Debug, Clone, Copy)]
pub struct PlanItem {
    pub protocol_address: u16,
    pub length: u16,
    /// Index into the slice of registers the plan was built from.
    pub register_index: usize,
}

/// A single contiguous read, plus the items it must satisfy.
#[derive(Debug, Clone)]
pub struct ReadRange {
    pub start: u16,
    pub count: u16,
    pub items: Vec<PlanItem>,
}

/// Resolves whether `registers` should be treated as 0-based or 40001-based,
/// honouring an explicit `AddressStyle` override first. `Auto` always
/// resolves to `FortyThousandOne`: whether or not any register reaches
/// 40001, addresses in `(0, 40001)` are 1-based short form and addresses
/// `>= 40001` are long form, and `to_protocol_address`'s `FortyThousandOne`
/// branch already applies both rules per-register.
fn resolve_address_style(style: AddressStyle) -> AddressStyle {
    match style {
        AddressStyle::Auto => AddressStyle::FortyThousandOne,
        explicit => explicit,
    }
}

/// Converts one catalog address to its protocol-form (0-based) address.
fn to_protocol_address(catalog_address: i32, style: AddressStyle) -> u16 {
    match style {
        AddressStyle::Zero => catalog_address.max(0) as u16,
        AddressStyle::FortyThousandOne | AddressStyle::Auto => {
            if catalog_address > 0 && catalog_address < FORTY_THOUSAND_ONE {
                // 1-based short form, e.g. a register configured as "3" under
                // a 40001-style device: treat as 1-based and subtract 1.
                (catalog_address - 1).max(0) as u16
            } else if catalog_address >= FORTY_THOUSAND_ONE {
                (catalog_address - FORTY_THOUSAND_ONE) as u16
            } else {
                // <= 0: passes through unchanged.
                catalog_address.max(0) as u16
            }
        }
    }
}

/// Builds the minimum contiguous read-range plan for one slave's registers.
/// `address_style` is the device-level override (`AddressStyle::Auto` falls
/// back to the heuristic).
pub fn build_plan(registers: &[Register], address_style: AddressStyle) -> Vec<ReadRange> {
    let style = resolve_address_style(address_style);

    let mut items: Vec<PlanItem> = registers
        .iter()
        .enumerate()
        .map(|(register_index, r)| PlanItem {
            protocol_address: to_protocol_address(r.catalog_address, style),
            length: r.length.max(1),
            register_index,
        })
        .collect();
    items.sort_by_key(|i| i.protocol_address);

    let mut ranges: Vec<ReadRange> = Vec::new();
    let mut current: Option<(u16, u16, Vec<PlanItem>)> = None; // (start, end, items)

    for item in items {
        let item_end = item.protocol_address.saturating_add(item.length.saturating_sub(1));
        match &mut current {
            None => {
                current = Some((item.protocol_address, item_end, vec![item]));
            }
            Some((start, end, batch)) => {
                let admits = item.protocol_address <= end.saturating_add(1)
                    && (item_end.saturating_sub(*start) + 1) <= MAX_RANGE_LEN;
                if admits {
                    *end = (*end).max(item_end);
                    batch.push(item);
                } else {
                    let (start, end, batch) = current.take().unwrap();
                    ranges.push(ReadRange {
                        start,
                        count: (end - start + 1).min(MAX_RANGE_LEN),
                        items: batch,
                    });
                    current = Some((item.protocol_address, item_end, vec![item]));
                }
            }
        }
    }
    if let Some((start, end, batch)) = current {
        ranges.push(ReadRange {
            start,
            count: (end - start + 1).min(MAX_RANGE_LEN),
            items: batch,
        });
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn reg(catalog_address: i32, length: u16) -> Register {
        Register {
            catalog_address,
            length,
            data_type: if length == 1 { DataType::U16 } else { DataType::Float32 },
            scale: 1.0,
            unit: String::new(),
            word_swap: false,
            healthy: true,
            signal_id: None,
        }
    }

    #[test]
    fn every_range_respects_bounds_and_ordering() {
        let registers = vec![reg(40001, 1), reg(40002, 2), reg(40010, 1)];
        let plan = build_plan(&registers, AddressStyle::Auto);
        let mut last_end: Option<i64> = None;
        for range in &plan {
            assert!(range.count >= 1 && range.count <= 125);
            for item in &range.items {
                assert!(item.protocol_address >= range.start);
                assert!(item.protocol_address + item.length - 1 <= range.start + range.count - 1);
            }
            if let Some(last) = last_end {
                assert!(range.start as i64 > last);
            }
            last_end = Some((range.start + range.count - 1) as i64);
        }
    }

    #[test]
    fn coalesces_contiguous_and_adjacent_items() {
        // catalog-addrs [40001 len 1, 40002 len 2, 40005 len 1]
        // => two protocol ranges: (start=0, count=3), (start=4, count=1)
        let registers = vec![reg(40001, 1), reg(40002, 2), reg(40005, 1)];
        let plan = build_plan(&registers, AddressStyle::Auto);
        assert_eq!(plan.len(), 2);
        assert_eq!((plan[0].start, plan[0].count), (0, 3));
        assert_eq!((plan[1].start, plan[1].count), (4, 1));
    }

    #[test]
    fn explicit_address_style_overrides_heuristic() {
        let registers = vec![reg(0, 1), reg(1, 1)];
        let plan = build_plan(&registers, AddressStyle::Zero);
        assert_eq!(plan.len(), 1);
        assert_eq!((plan[0].start, plan[0].count), (0, 2));
    }

    #[test]
    fn auto_style_treats_low_addresses_as_one_based() {
        // No register reaches 40001, so the device is low-address. Per the
        // 1-based short-form rule, catalog "3" lands on protocol address 2.
        let registers = vec![reg(3, 1), reg(4, 2)];
        let plan = build_plan(&registers, AddressStyle::Auto);
        assert_eq!(plan.len(), 1);
        assert_eq!((plan[0].start, plan[0].count), (2, 3));
    }

    #[test]
    fn clamps_ranges_to_125_registers() {
        let registers: Vec<Register> = (0..130).map(|i| reg(i, 1)).collect();
        let plan = build_plan(&registers, AddressStyle::Zero);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].count, 125);
        assert_eq!(plan[1].count, 5);
    }
}
