//! Propagating parsed fragment timing through playlists, and merging
//! refreshed live playlists with what is already known.

use super::fragment::Fragment;
use super::level::{Level, LevelDetails};

/// Fixes the neighbour of `fragments[from]` from its known timing: the
/// duration of the earlier one when the later start PTS is known, else the
/// start of the unknown one.
fn update_pts(fragments: &mut [Fragment], from: usize, to: usize) {
    let (frag_from_start, frag_from_duration) = (fragments[from].start, fragments[from].duration);
    let to_start_pts = fragments[to].start_pts;
    match to_start_pts {
        Some(to_pts) if to > from => {
            let frag_from = &mut fragments[from];
            frag_from.duration = to_pts - frag_from.start;
            if frag_from.duration < 0.0 {
                log::warn!(
                    "[level-helper] negative duration computed for frag {}, level {}",
                    frag_from.sn,
                    frag_from.level
                );
            }
        }
        Some(to_pts) => {
            let frag_to = &mut fragments[to];
            frag_to.duration = frag_from_start - to_pts;
            if frag_to.duration < 0.0 {
                log::warn!(
                    "[level-helper] negative duration computed for frag {}, level {}",
                    frag_to.sn,
                    frag_to.level
                );
            }
        }
        None if to > from => fragments[to].start = frag_from_start + frag_from_duration,
        None => fragments[to].start = (frag_from_start - fragments[to].duration).max(0.0),
    }
}

/// Records parsed timing on `frag` and propagates it through `details`.
/// Returns the drift between the parsed and the playlist start.
pub fn update_frag_pts_dts(
    details: Option<&mut LevelDetails>,
    frag: &mut Fragment,
    mut start_pts: f64,
    mut end_pts: f64,
    mut start_dts: f64,
    mut end_dts: f64,
) -> f64 {
    let mut max_start_pts = start_pts;
    if let Some(known_start) = frag.start_pts {
        let delta_pts = (known_start - start_pts).abs();
        frag.delta_pts = Some(frag.delta_pts.map_or(delta_pts, |d| d.max(delta_pts)));

        max_start_pts = start_pts.max(known_start);
        start_pts = start_pts.min(known_start);
        end_pts = frag.end_pts.map_or(end_pts, |e| end_pts.max(e));
        start_dts = frag.start_dts.map_or(start_dts, |s| start_dts.min(s));
        end_dts = frag.end_dts.map_or(end_dts, |e| end_dts.max(e));
    }

    let drift = start_pts - frag.start;
    frag.start = start_pts;
    frag.start_pts = Some(start_pts);
    frag.max_start_pts = Some(max_start_pts);
    frag.end_pts = Some(end_pts);
    frag.start_dts = Some(start_dts);
    frag.end_dts = Some(end_dts);
    frag.duration = end_pts - start_pts;

    let Some(details) = details else {
        return 0.0;
    };
    if frag.sn < details.start_sn || frag.sn > details.end_sn {
        return 0.0;
    }
    let index = (frag.sn - details.start_sn) as usize;
    let Some(slot) = details.fragments.get_mut(index) else {
        return 0.0;
    };
    // the playlist may have been refreshed while the fragment loaded
    *slot = frag.clone();

    for i in (1..=index).rev() {
        update_pts(&mut details.fragments, i, i - 1);
    }
    for i in index..details.fragments.len().saturating_sub(1) {
        update_pts(&mut details.fragments, i, i + 1);
    }
    details.pts_known = true;
    drift
}

/// Index pairs `(old, new)` of fragments present in both playlists.
fn fragment_intersection(old: &LevelDetails, new: &LevelDetails) -> Vec<(usize, usize)> {
    let start = old.start_sn.max(new.start_sn);
    let end = old.end_sn.min(new.end_sn);
    (start..=end)
        .map_while(|sn| {
            let old_index = (sn.checked_sub(old.start_sn)?) as usize;
            let new_index = (sn.checked_sub(new.start_sn)?) as usize;
            (old_index < old.fragments.len() && new_index < new.fragments.len()).then_some((old_index, new_index))
        })
        .collect()
}

/// Carries timing, discontinuity counters and PTS knowledge from a previous
/// version of a live playlist into a refreshed one.
pub fn merge_details(old: &LevelDetails, new: &mut LevelDetails) {
    let mut cc_offset: i64 = 0;
    let mut pts_frag: Option<usize> = None;
    let intersection = fragment_intersection(old, new);

    for &(old_index, new_index) in &intersection {
        let old_frag = &old.fragments[old_index];
        let new_frag = &mut new.fragments[new_index];
        cc_offset = old_frag.cc as i64 - new_frag.cc as i64;
        if let Some(start_pts) = old_frag.start_pts {
            new_frag.start = start_pts;
            new_frag.start_pts = Some(start_pts);
            new_frag.end_pts = old_frag.end_pts;
            new_frag.start_dts = old_frag.start_dts;
            new_frag.end_dts = old_frag.end_dts;
            new_frag.duration = old_frag.duration;
            pts_frag = Some(new_index);
        }
    }
    if intersection.is_empty() {
        return;
    }

    if cc_offset != 0 {
        log::info!("[level-helper] discontinuity sliding from playlist, take drift into account");
        for frag in new.fragments.iter_mut() {
            frag.cc = (frag.cc as i64 + cc_offset).max(0) as u32;
        }
    }

    match pts_frag {
        Some(index) => {
            let mut frag = new.fragments[index].clone();
            let (start_pts, end_pts) = (frag.start_pts.unwrap_or(frag.start), frag.end_pts.unwrap_or(frag.end()));
            let (start_dts, end_dts) = (frag.start_dts.unwrap_or(start_pts), frag.end_dts.unwrap_or(end_pts));
            update_frag_pts_dts(Some(new), &mut frag, start_pts, end_pts, start_dts, end_dts);
        }
        None => adjust_sliding(old, new),
    }
    new.pts_known = old.pts_known;
}

/// Shifts the new playlist's fragment starts by the start of the first
/// shared fragment in the old one.
pub fn adjust_sliding(old: &LevelDetails, new: &mut LevelDetails) {
    let Some(delta) = new.start_sn.checked_sub(old.start_sn) else {
        return;
    };
    let Some(reference) = old.fragments.get(delta as usize) else {
        return;
    };
    let offset = reference.start;
    new.fragments.iter_mut().for_each(|frag| frag.start += offset);
}

/// Milliseconds to wait before refreshing a live playlist.
pub fn compute_reload_interval(details: &LevelDetails, round_trip_ms: f64) -> u64 {
    let reload_interval = 1000.0 * details.average_target_duration.unwrap_or(details.target_duration);
    let estimate = if details.updated {
        reload_interval - round_trip_ms
    } else {
        // an unchanged playlist is retried after half a target duration
        reload_interval / 2.0
    };
    estimate.max(0.0).round() as u64
}

pub fn get_fragment_with_sn(level: &Level, sn: u64) -> Option<&Fragment> {
    level.details.as_ref()?.fragment(sn)
}
