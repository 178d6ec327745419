//! 候选标记选择: 多个候选共用同一图案时取可信度最高者

use super::types::{MarkerCandidate, PatternId};

/// 在候选中选出目标图案可信度最高的一个
///
/// 可信度相同时保留先出现的候选 (严格大于才替换), 保证结果确定.
/// 没有匹配目标图案的候选时返回 None.
pub fn select_best(candidates: &[MarkerCandidate], target: PatternId) -> Option<&MarkerCandidate> {
    let mut best: Option<&MarkerCandidate> = None;
    for candidate in candidates.iter().filter(|c| c.id == target) {
        match best {
            Some(b) if candidate.confidence > b.confidence => best = Some(candidate),
            None => best = Some(candidate),
            _ => {}
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::MarkerGeometry;

    fn candidate(id: PatternId, confidence: f64, x: f64) -> MarkerCandidate {
        MarkerCandidate {
            id,
            confidence,
            geometry: MarkerGeometry::from_vertices([
                (x, 0.0),
                (x + 10.0, 0.0),
                (x + 10.0, 10.0),
                (x, 10.0),
            ]),
        }
    }

    #[test]
    fn test_picks_highest_confidence() {
        let candidates = vec![candidate(0, 0.6, 0.0), candidate(0, 0.9, 20.0), candidate(1, 0.99, 40.0)];
        let best = select_best(&candidates, 0).unwrap();
        assert_eq!(best.confidence, 0.9);
        assert_eq!(best.geometry.vertices[0].0, 20.0);
    }

    #[test]
    fn test_none_when_target_missing() {
        let candidates = vec![candidate(1, 0.9, 0.0), candidate(-1, 0.0, 20.0)];
        assert!(select_best(&candidates, 0).is_none());
        assert!(select_best(&[], 0).is_none());
    }

    #[test]
    fn test_ties_keep_first() {
        let candidates = vec![candidate(0, 0.8, 0.0), candidate(0, 0.8, 20.0)];
        let best = select_best(&candidates, 0).unwrap();
        assert_eq!(best.geometry.vertices[0].0, 0.0);
    }
}
