//! Greedy IoU identity assignment for body boxes.

use std::collections::HashMap;

use vigil_models::{BoundingBox, TrackId};

#[derive(Debug, Clone)]
struct Slot {
    bbox: BoundingBox,
    /// Consecutive frames without a matching detection
    misses: u32,
}

/// Assigns persistent ids to per-frame detections by greedy IoU matching.
///
/// Each detection, in order, claims the still-unclaimed track it overlaps
/// most (above the threshold); leftovers start new tracks. Tracks unmatched
/// for more than `max_gap` frames are retired.
#[derive(Debug)]
pub struct IoUTracker {
    iou_threshold: f64,
    max_gap: u32,
    slots: HashMap<TrackId, Slot>,
    next_id: TrackId,
}

impl IoUTracker {
    pub fn new(iou_threshold: f64, max_gap: u32) -> Self {
        Self::starting_at(iou_threshold, max_gap, 1)
    }

    /// Like [`new`](Self::new), but the first new track gets `first_id`.
    pub fn starting_at(iou_threshold: f64, max_gap: u32, first_id: TrackId) -> Self {
        Self {
            iou_threshold,
            max_gap,
            slots: HashMap::new(),
            next_id: first_id.max(1),
        }
    }

    pub fn set_max_gap(&mut self, max_gap: u32) {
        self.max_gap = max_gap;
    }

    /// Id the next new track will receive.
    pub fn next_id(&self) -> TrackId {
        self.next_id
    }

    /// Assign ids to this frame's detections, returned in input order.
    pub fn update(&mut self, detections: &[(BoundingBox, f32)]) -> Vec<(TrackId, BoundingBox, f32)> {
        let mut unclaimed: Vec<TrackId> = self.slots.keys().copied().collect();
        unclaimed.sort_unstable();

        let mut assigned = Vec::with_capacity(detections.len());
        for &(bbox, confidence) in detections {
            let best = unclaimed
                .iter()
                .enumerate()
                .filter_map(|(pos, id)| {
                    let iou = self.slots.get(id)?.bbox.iou(&bbox);
                    (iou > self.iou_threshold).then_some((pos, *id, iou))
                })
                .fold(None, |best: Option<(usize, TrackId, f64)>, candidate| match best {
                    Some(b) if b.2 >= candidate.2 => Some(b),
                    _ => Some(candidate),
                });

            let id = match best {
                Some((pos, id, _)) => {
                    unclaimed.swap_remove(pos);
                    id
                }
                None => {
                    let id = self.next_id;
                    self.next_id = self.next_id.wrapping_add(1);
                    id
                }
            };

            self.slots.insert(id, Slot { bbox, misses: 0 });
            assigned.push((id, bbox, confidence));
        }

        let max_gap = self.max_gap;
        for id in unclaimed {
            if let Some(slot) = self.slots.get_mut(&id) {
                slot.misses += 1;
                if slot.misses > max_gap {
                    self.slots.remove(&id);
                }
            }
        }

        assigned
    }

    /// Forget every track. Ids keep counting up, so old ids are never reissued.
    pub fn reset(&mut self) {
        self.slots.clear();
    }

    /// Tracks still remembered, matched this frame or not.
    pub fn track_count(&self) -> usize {
        self.slots.len()
    }
}
