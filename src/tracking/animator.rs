//! 物体旋转动画

/// 旋转速度 (度/秒)
pub const ROTATION_SPEED_DEG: f32 = 45.0;

/// 绕标记竖直轴 (Z) 的旋转角, 始终在 [0, 360) 内
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ObjectAnimator {
    angle_deg: f32,
}

impl ObjectAnimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn angle_deg(&self) -> f32 {
        self.angle_deg
    }

    /// 推进 `elapsed_s` 秒; 未启用旋转时角度不变
    pub fn advance(&mut self, elapsed_s: f32, enabled: bool) {
        if !enabled {
            return;
        }
        self.angle_deg = (self.angle_deg + elapsed_s * ROTATION_SPEED_DEG).rem_euclid(360.0);
        // rem_euclid 在浮点舍入下可能恰好返回 360.0
        if self.angle_deg >= 360.0 {
            self.angle_deg = 0.0;
        }
    }

    #[cfg(test)]
    pub(crate) fn with_angle(angle_deg: f32) -> Self {
        Self { angle_deg }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraps_past_full_turn() {
        let mut animator = ObjectAnimator::with_angle(350.0);
        animator.advance(1.0, true);
        assert!((animator.angle_deg() - 35.0).abs() < 1e-4);
    }

    #[test]
    fn test_disabled_keeps_angle() {
        let mut animator = ObjectAnimator::with_angle(120.0);
        animator.advance(2.0, false);
        assert_eq!(animator.angle_deg(), 120.0);
    }

    #[test]
    fn test_long_gap_stays_in_range() {
        let mut animator = ObjectAnimator::new();
        animator.advance(1000.3, true);
        let a = animator.angle_deg();
        assert!((0.0..360.0).contains(&a));
    }
}
