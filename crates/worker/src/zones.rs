//! Zone planning: map chapter structure and configured multipliers to the
//! encoder's `zones=` frame ranges.

use crate::probe::VideoInfo;
use hevc_swarm_config::ZoneConfig;

/// Title sequences are assumed to live in the first ten minutes; a first
/// chapter ending later than this gets no title zone.
const TITLE_CHAPTER_MAX_END_S: f64 = 600.0;

/// Substring that marks a first episode when `skip_first_episodes` is set.
/// Matching is case-sensitive.
const FIRST_EPISODE_MARK: &str = "E01";

/// Compute the zone string for one title.
///
/// Returns `/`-joined `start_frame,end_frame,b=multiplier` triples, or an
/// empty string when no zone applies. Absence of any required field
/// (duration, frame rate, chapters for the title zone) short-circuits the
/// affected rule.
pub fn plan_zones(info: &VideoInfo, cfg: &ZoneConfig) -> String {
    if cfg.skip_first_episodes && is_first_episode(info) {
        return String::new();
    }

    let (Some(duration), Some(fps)) = (info.duration_s, info.frame_rate_fps) else {
        return String::new();
    };

    let mut zones = Vec::new();

    if let Some((lead_s, multiplier)) = cfg.title_rate {
        if let Some(zone) = title_zone(info, lead_s, multiplier, fps) {
            zones.push(zone);
        }
    }

    if let Some((tail_s, multiplier)) = cfg.closing_rate {
        let start = frame_at((duration - tail_s).max(0.0), fps);
        let end = frame_at(duration, fps);
        if start < end {
            zones.push(format_zone(start, end, multiplier));
        }
    }

    zones.join("/")
}

fn is_first_episode(info: &VideoInfo) -> bool {
    info.path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.contains(FIRST_EPISODE_MARK))
        .unwrap_or(false)
}

fn title_zone(info: &VideoInfo, lead_s: f64, multiplier: f64, fps: f64) -> Option<String> {
    let first = info
        .chapters
        .iter()
        .min_by(|a, b| a.start_s.total_cmp(&b.start_s))?;
    let end_s = first.end_s?;
    if end_s > TITLE_CHAPTER_MAX_END_S {
        return None;
    }

    let start = frame_at((end_s - lead_s).max(0.0), fps);
    let end = frame_at(end_s, fps);
    (start < end).then(|| format_zone(start, end, multiplier))
}

fn frame_at(time_s: f64, fps: f64) -> u64 {
    (time_s * fps).floor() as u64
}

fn format_zone(start: u64, end: u64, multiplier: f64) -> String {
    format!("{start},{end},b={multiplier}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Chapter;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn info(path: &str, duration: Option<f64>, fps: Option<f64>, chapters: Vec<Chapter>) -> VideoInfo {
        VideoInfo {
            path: PathBuf::from(path),
            duration_s: duration,
            frame_rate_fps: fps,
            has_hdr_dv: false,
            chapters,
            text_subtitle_indices: Vec::new(),
            crop: None,
        }
    }

    fn chapter(start: f64, end: f64) -> Chapter {
        Chapter { start_s: start, end_s: Some(end) }
    }

    #[test]
    fn test_title_and_closing_zones() {
        let info = info(
            "/media/film.mkv",
            Some(1500.0),
            Some(24.0),
            vec![chapter(0.0, 60.0), chapter(60.0, 1200.0), chapter(1200.0, 1500.0)],
        );
        let cfg = ZoneConfig {
            title_rate: Some((30.0, 0.5)),
            closing_rate: Some((60.0, 0.7)),
            skip_first_episodes: false,
        };

        assert_eq!(plan_zones(&info, &cfg), "720,1440,b=0.5/34560,36000,b=0.7");
    }

    #[test]
    fn test_first_episode_skip_is_case_sensitive() {
        let cfg = ZoneConfig {
            title_rate: Some((30.0, 0.5)),
            closing_rate: None,
            skip_first_episodes: true,
        };
        let episode = info(
            "/media/Show.S01E01.mkv",
            Some(1500.0),
            Some(24.0),
            vec![chapter(0.0, 60.0)],
        );
        assert_eq!(plan_zones(&episode, &cfg), "");

        // Lowercase marker does not match.
        let lowercase = info(
            "/media/Show.S01e01.mkv",
            Some(1500.0),
            Some(24.0),
            vec![chapter(0.0, 60.0)],
        );
        assert_eq!(plan_zones(&lowercase, &cfg), "720,1440,b=0.5");
    }

    #[test]
    fn test_missing_duration_or_fps_yields_empty() {
        let cfg = ZoneConfig {
            title_rate: Some((30.0, 0.5)),
            closing_rate: Some((60.0, 0.7)),
            skip_first_episodes: false,
        };
        let no_dur = info("/m/a.mkv", None, Some(24.0), vec![chapter(0.0, 60.0)]);
        assert_eq!(plan_zones(&no_dur, &cfg), "");

        let no_fps = info("/m/a.mkv", Some(1500.0), None, vec![chapter(0.0, 60.0)]);
        assert_eq!(plan_zones(&no_fps, &cfg), "");
    }

    #[test]
    fn test_no_chapters_drops_title_zone_only() {
        let cfg = ZoneConfig {
            title_rate: Some((30.0, 0.5)),
            closing_rate: Some((60.0, 0.7)),
            skip_first_episodes: false,
        };
        let info = info("/m/a.mkv", Some(1500.0), Some(24.0), Vec::new());
        assert_eq!(plan_zones(&info, &cfg), "34560,36000,b=0.7");
    }

    #[test]
    fn test_late_first_chapter_gets_no_title_zone() {
        let cfg = ZoneConfig {
            title_rate: Some((30.0, 0.5)),
            closing_rate: None,
            skip_first_episodes: false,
        };
        // First chapter ends after the ten-minute window.
        let info = info(
            "/m/a.mkv",
            Some(5400.0),
            Some(24.0),
            vec![chapter(0.0, 700.0)],
        );
        assert_eq!(plan_zones(&info, &cfg), "");
    }

    #[test]
    fn test_chapter_without_end_gets_no_title_zone() {
        let cfg = ZoneConfig {
            title_rate: Some((30.0, 0.5)),
            closing_rate: None,
            skip_first_episodes: false,
        };
        let info = info(
            "/m/a.mkv",
            Some(1500.0),
            Some(24.0),
            vec![Chapter { start_s: 0.0, end_s: None }],
        );
        assert_eq!(plan_zones(&info, &cfg), "");
    }

    #[test]
    fn test_title_lead_clamps_to_zero() {
        let cfg = ZoneConfig {
            title_rate: Some((120.0, 0.5)),
            closing_rate: None,
            skip_first_episodes: false,
        };
        // Lead longer than the chapter: the zone starts at frame 0.
        let info = info("/m/a.mkv", Some(1500.0), Some(24.0), vec![chapter(0.0, 60.0)]);
        assert_eq!(plan_zones(&info, &cfg), "0,1440,b=0.5");
    }

    #[test]
    fn test_no_config_yields_empty() {
        let info = info("/m/a.mkv", Some(1500.0), Some(24.0), vec![chapter(0.0, 60.0)]);
        assert_eq!(plan_zones(&info, &ZoneConfig::default()), "");
    }

    proptest! {
        // Every emitted zone is well-framed: start < end, both derived by
        // flooring, and within the title's frame count for the tail zone.
        #[test]
        fn prop_zone_framing(
            duration in 600.0f64..20_000.0,
            fps in 10.0f64..120.0,
            lead in 1.0f64..300.0,
            tail in 1.0f64..300.0,
            chapter_end in 1.0f64..590.0,
        ) {
            let cfg = ZoneConfig {
                title_rate: Some((lead, 0.5)),
                closing_rate: Some((tail, 0.7)),
                skip_first_episodes: false,
            };
            let info = info(
                "/m/a.mkv",
                Some(duration),
                Some(fps),
                vec![chapter(0.0, chapter_end)],
            );

            let plan = plan_zones(&info, &cfg);
            for zone in plan.split('/').filter(|z| !z.is_empty()) {
                let mut parts = zone.split(',');
                let start: u64 = parts.next().unwrap().parse().unwrap();
                let end: u64 = parts.next().unwrap().parse().unwrap();
                let mult = parts.next().unwrap();
                prop_assert!(start < end);
                prop_assert!(mult.starts_with("b="));
                prop_assert!(end <= (duration * fps).floor() as u64);
            }
        }
    }
}
