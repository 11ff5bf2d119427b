//! Byte-level traversal of a configuration descriptor's trailing descriptor
//! stream, grouping it into interfaces and interface associations.
//!
//! This operates on the bytes *after* the 9-byte configuration header, i.e.
//! the same slice [`crate::descriptors::ConfigurationDescriptor::descriptors`]
//! iterates, but walks it directly rather than through `DescriptorIter`
//! because the grouping rule (stop an IAD at `bInterfaceCount` top-level
//! interfaces or the next IAD, stop a bare interface at the next top-level
//! interface) doesn't fit that iterator's per-type splitting.

use log::warn;
use std::ops::Range;

use crate::descriptors::{InterfaceAssociationDescriptor, DESCRIPTOR_TYPE_IAD, DESCRIPTOR_TYPE_INTERFACE};

/// One logical group produced by walking a configuration's descriptor
/// stream: either a single interface (with all of its alternate settings)
/// or an interface association spanning several top-level interfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Byte range of this group, relative to the start of the descriptor
    /// stream passed to [`walk`] (i.e. relative to the byte following the
    /// configuration header).
    pub range: Range<usize>,
    /// Top-level interface numbers covered by this group, in encounter order.
    pub interface_numbers: Vec<u8>,
}

impl Group {
    /// The first (or only) interface number in the group.
    ///
    /// Always present: [`walk`] never emits a group with an empty
    /// `interface_numbers`.
    pub fn first_interface_number(&self) -> u8 {
        self.interface_numbers[0]
    }
}

/// Result of walking a configuration's descriptor stream.
#[derive(Debug, Clone)]
pub struct WalkResult {
    /// Groups found, in stream order.
    pub groups: Vec<Group>,
    /// `false` if the walk stopped early because a descriptor's `bLength`
    /// was zero or would have read past the end of the stream.
    pub complete: bool,
}

struct Header {
    length: usize,
    descriptor_type: u8,
}

fn header_at(buf: &[u8], pos: usize) -> Option<Header> {
    let remaining = buf.len().checked_sub(pos)?;
    if remaining < 2 {
        return None;
    }
    let length = buf[pos] as usize;
    if length == 0 {
        warn!("descriptor at offset {pos} has bLength 0, aborting walk");
        return None;
    }
    if length > remaining {
        warn!(
            "descriptor at offset {pos} claims bLength {length}, only {remaining} bytes remain"
        );
        return None;
    }
    Some(Header {
        length,
        descriptor_type: buf[pos + 1],
    })
}

/// `(interface_number, alternate_setting)` for an interface descriptor
/// header known to start at `pos` with at least `DESCRIPTOR_LEN_INTERFACE`
/// bytes available (checked by `header_at`'s length validation, since real
/// interface descriptors are always at least 9 bytes).
fn interface_fields(buf: &[u8], pos: usize, length: usize) -> Option<(u8, u8)> {
    if length < 4 {
        return None;
    }
    let _ = buf.get(pos + 3)?;
    Some((buf[pos + 2], buf[pos + 3]))
}

/// Advance from `start` to the end of the current group: the offset of the
/// next top-level interface descriptor (`bDescriptorType == 0x04 &&
/// bAlternateSetting == 0`), the next IAD if `stop_at_iad` is set, or the
/// end of the buffer. Returns `None` (with `complete` left for the caller to
/// clear) if a malformed descriptor is hit along the way.
fn scan_to_next_top_level(buf: &[u8], start: usize, stop_at_iad: bool) -> (usize, bool) {
    let mut pos = start;
    while pos < buf.len() {
        let Some(header) = header_at(buf, pos) else {
            return (pos, false);
        };
        if header.descriptor_type == DESCRIPTOR_TYPE_INTERFACE {
            if let Some((_, alt)) = interface_fields(buf, pos, header.length) {
                if alt == 0 {
                    return (pos, true);
                }
            }
        }
        if stop_at_iad && header.descriptor_type == DESCRIPTOR_TYPE_IAD {
            return (pos, true);
        }
        pos += header.length;
    }
    (pos, true)
}

/// Walk a configuration's trailing descriptor stream into interface and IAD
/// groups, per the grouping rule: an IAD consumes `bInterfaceCount`
/// top-level interfaces (stopping early if another IAD appears first), a
/// bare interface's group runs up to the next top-level interface
/// descriptor, and alternate settings and class-specific/endpoint
/// descriptors stay inside whichever group they trail.
pub fn walk(buf: &[u8]) -> WalkResult {
    let mut groups = Vec::new();
    let mut pos = 0usize;
    let mut complete = true;

    while pos < buf.len() {
        let Some(header) = header_at(buf, pos) else {
            complete = false;
            break;
        };

        match header.descriptor_type {
            DESCRIPTOR_TYPE_IAD => {
                let Some(iad) = InterfaceAssociationDescriptor::new(&buf[pos..]) else {
                    warn!("IAD at offset {pos} is shorter than the minimum IAD length");
                    complete = false;
                    break;
                };
                let wanted = iad.interface_count() as usize;
                let group_start = pos;
                let mut cursor = pos + header.length;
                let mut interface_numbers = Vec::new();

                while interface_numbers.len() < wanted && cursor < buf.len() {
                    let Some(next) = header_at(buf, cursor) else {
                        complete = false;
                        break;
                    };
                    if next.descriptor_type == DESCRIPTOR_TYPE_IAD {
                        // Another IAD starts before bInterfaceCount top-level
                        // interfaces were found; stop this group here.
                        break;
                    }
                    if next.descriptor_type == DESCRIPTOR_TYPE_INTERFACE {
                        if let Some((intf_num, alt)) = interface_fields(buf, cursor, next.length) {
                            if alt == 0 {
                                interface_numbers.push(intf_num);
                            }
                        }
                    }
                    cursor += next.length;
                }

                if interface_numbers.is_empty() {
                    warn!("IAD at offset {pos} produced no top-level interfaces");
                    complete = false;
                    break;
                }

                groups.push(Group {
                    range: group_start..cursor,
                    interface_numbers,
                });
                pos = cursor;
            }
            DESCRIPTOR_TYPE_INTERFACE => {
                let Some((intf_num, _alt)) = interface_fields(buf, pos, header.length) else {
                    complete = false;
                    break;
                };
                let group_start = pos;
                let (cursor, ok) = scan_to_next_top_level(buf, pos + header.length, false);
                if !ok {
                    complete = false;
                }
                groups.push(Group {
                    range: group_start..cursor,
                    interface_numbers: vec![intf_num],
                });
                pos = cursor;
                if !ok {
                    break;
                }
            }
            _ => {
                pos += header.length;
            }
        }
    }

    WalkResult { groups, complete }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interface(number: u8, alt: u8, num_endpoints: u8) -> Vec<u8> {
        vec![9, 4, number, alt, num_endpoints, 0xff, 0, 0, 0]
    }

    fn endpoint(address: u8) -> Vec<u8> {
        vec![7, 5, address, 2, 0x40, 0, 1]
    }

    fn iad(first: u8, count: u8) -> Vec<u8> {
        vec![8, 0x0b, first, count, 0xff, 0, 0, 0]
    }

    #[test]
    fn single_interface_with_endpoints() {
        let mut buf = interface(0, 0, 2);
        buf.extend(endpoint(0x81));
        buf.extend(endpoint(0x02));

        let result = walk(&buf);
        assert!(result.complete);
        assert_eq!(result.groups.len(), 1);
        assert_eq!(result.groups[0].interface_numbers, vec![0]);
        assert_eq!(result.groups[0].range, 0..buf.len());
    }

    #[test]
    fn two_bare_interfaces() {
        let mut buf = interface(0, 0, 0);
        buf.extend(interface(1, 0, 0));

        let result = walk(&buf);
        assert!(result.complete);
        assert_eq!(result.groups.len(), 2);
        assert_eq!(result.groups[0].interface_numbers, vec![0]);
        assert_eq!(result.groups[0].range, 0..9);
        assert_eq!(result.groups[1].interface_numbers, vec![1]);
        assert_eq!(result.groups[1].range, 9..18);
    }

    #[test]
    fn alternate_settings_merge_into_one_group() {
        let mut buf = interface(0, 0, 1);
        buf.extend(endpoint(0x81));
        buf.extend(interface(0, 1, 1));
        buf.extend(endpoint(0x81));
        buf.extend(interface(1, 0, 0));

        let result = walk(&buf);
        assert!(result.complete);
        assert_eq!(result.groups.len(), 2);
        assert_eq!(result.groups[0].interface_numbers, vec![0]);
        assert_eq!(result.groups[0].range, 0..32);
        assert_eq!(result.groups[1].interface_numbers, vec![1]);
    }

    #[test]
    fn iad_groups_exactly_its_interface_count() {
        let mut buf = iad(0, 2);
        buf.extend(interface(0, 0, 0)); // video control
        buf.extend(interface(1, 0, 0)); // video streaming, alt 0
        buf.extend(interface(1, 1, 1)); // video streaming, alt 1
        buf.extend(endpoint(0x82));
        buf.extend(interface(2, 0, 0)); // unrelated trailing interface

        let result = walk(&buf);
        assert!(result.complete);
        assert_eq!(result.groups.len(), 2);
        assert_eq!(result.groups[0].interface_numbers, vec![0, 1]);
        assert_eq!(result.groups[1].interface_numbers, vec![2]);
    }

    #[test]
    fn iad_stops_early_at_next_iad() {
        let mut buf = iad(0, 3); // claims 3, but only 1 is present before the next IAD
        buf.extend(interface(0, 0, 0));
        buf.extend(iad(1, 1));
        buf.extend(interface(1, 0, 0));

        let result = walk(&buf);
        assert_eq!(result.groups.len(), 2);
        assert_eq!(result.groups[0].interface_numbers, vec![0]);
        assert_eq!(result.groups[1].interface_numbers, vec![1]);
    }

    #[test]
    fn zero_length_descriptor_is_fatal() {
        let buf = vec![0, 4, 0, 0, 0, 0xff, 0, 0, 0];
        let result = walk(&buf);
        assert!(!result.complete);
        assert!(result.groups.is_empty());
    }

    #[test]
    fn truncated_descriptor_marks_incomplete() {
        let mut buf = interface(0, 0, 1);
        buf.push(7); // start of an endpoint descriptor whose bLength claims 7
        buf.push(5);
        // but the buffer ends here, 5 bytes short

        let result = walk(&buf);
        assert!(!result.complete);
    }

    #[test]
    fn coverage_matches_whole_blob_for_well_formed_input() {
        let mut buf = iad(0, 2);
        buf.extend(interface(0, 0, 0));
        buf.extend(interface(1, 0, 1));
        buf.extend(endpoint(0x81));
        buf.extend(interface(2, 0, 0));

        let result = walk(&buf);
        assert!(result.complete);
        let covered: usize = result.groups.iter().map(|g| g.range.len()).sum();
        assert_eq!(covered, buf.len());

        let mut cursor = 0;
        for group in &result.groups {
            assert_eq!(group.range.start, cursor);
            cursor = group.range.end;
        }
        assert_eq!(cursor, buf.len());
    }
}
