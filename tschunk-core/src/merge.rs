//! Deterministic point sorting
//!
//! Small series are sorted in place. Series above the shard size are split
//! into fixed-size shards, each shard is sorted on its own, and the shards are
//! merged through a binary min-heap keyed by [`compare_points`]. Because the
//! comparator is a total order the output never depends on where the shard
//! boundaries fell.

use crate::series::{compare_points, PointBuf};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Sort with the default shard size
pub fn sort_points(points: Vec<PointBuf>) -> Vec<PointBuf> {
    sort_points_sharded(points, crate::config::SORT_SHARD_SIZE)
}

/// Sort, sharding and k-way merging when `points.len() > shard_size`
pub fn sort_points_sharded(mut points: Vec<PointBuf>, shard_size: usize) -> Vec<PointBuf> {
    let shard_size = shard_size.max(1);
    if points.len() <= 1 {
        return points;
    }
    if points.len() <= shard_size {
        points.sort_unstable_by(compare_points);
        return points;
    }

    let total = points.len();
    let mut shards: Vec<Vec<PointBuf>> = Vec::with_capacity(total.div_ceil(shard_size));
    let mut rest = points;
    while !rest.is_empty() {
        let tail = if rest.len() > shard_size {
            rest.split_off(shard_size)
        } else {
            Vec::new()
        };
        let mut shard = rest;
        shard.sort_unstable_by(compare_points);
        shards.push(shard);
        rest = tail;
    }

    kway_merge(shards, total)
}

/// Merge already sorted shards into one sorted vector
pub fn kway_merge(shards: Vec<Vec<PointBuf>>, size_hint: usize) -> Vec<PointBuf> {
    let mut cursors: Vec<std::vec::IntoIter<PointBuf>> =
        shards.into_iter().map(Vec::into_iter).collect();
    let mut heap = BinaryHeap::with_capacity(cursors.len());

    for (shard, cursor) in cursors.iter_mut().enumerate() {
        if let Some(point) = cursor.next() {
            heap.push(HeapEntry { point, shard });
        }
    }

    let mut out = Vec::with_capacity(size_hint);
    while let Some(HeapEntry { point, shard }) = heap.pop() {
        out.push(point);
        if let Some(next) = cursors[shard].next() {
            heap.push(HeapEntry { point: next, shard });
        }
    }
    out
}

struct HeapEntry {
    point: PointBuf,
    shard: usize,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse to pop the smallest point first.
        compare_points(&other.point, &self.point).then_with(|| other.shard.cmp(&self.shard))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}
