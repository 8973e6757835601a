use serde::{Deserialize, Serialize};

/// Outcome statistics over a trailing window of closes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub trades: usize,
    pub wins: u32,
    pub losses: u32,
    pub gross_win: f64,
    pub gross_loss: f64,
    pub max_loss_streak: u32,
}

impl WindowStats {
    /// Returns must be in chronological order for the streak to be meaningful
    pub fn from_returns<I>(returns: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut stats = WindowStats::default();
        let mut streak = 0u32;

        for ret in returns {
            stats.trades += 1;
            if ret > 0.0 {
                stats.wins += 1;
                stats.gross_win += ret;
                streak = 0;
            } else if ret < 0.0 {
                stats.losses += 1;
                stats.gross_loss += ret.abs();
                streak += 1;
                stats.max_loss_streak = stats.max_loss_streak.max(streak);
            } else {
                // Flat closes neither win nor lose, but they do break a losing run
                streak = 0;
            }
        }

        stats
    }

    /// Profit factor: `None` when undefined (no wins and no losses),
    /// `+inf` when there are wins but no losses.
    pub fn profit_factor(&self) -> Option<f64> {
        if self.gross_loss > 0.0 {
            Some(self.gross_win / self.gross_loss)
        } else if self.gross_win > 0.0 {
            Some(f64::INFINITY)
        } else {
            None
        }
    }

    /// Losses over decisive closes; `None` without any
    pub fn loss_share(&self) -> Option<f64> {
        let decisive = self.wins + self.losses;
        if decisive == 0 {
            None
        } else {
            Some(self.losses as f64 / decisive as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pf_loss_share_and_streak() {
        let stats = WindowStats::from_returns([1.0, -0.5, -0.5, -1.0, 2.0, -1.0]);
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.losses, 4);
        assert_eq!(stats.max_loss_streak, 3);
        assert!((stats.profit_factor().unwrap() - 1.0).abs() < 1e-12);
        assert!((stats.loss_share().unwrap() - 4.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn wins_without_losses_is_infinite_pf() {
        let stats = WindowStats::from_returns([0.4, 0.1]);
        assert_eq!(stats.profit_factor(), Some(f64::INFINITY));
        assert_eq!(stats.loss_share(), Some(0.0));
    }

    #[test]
    fn empty_window_is_undefined() {
        let stats = WindowStats::from_returns(std::iter::empty());
        assert_eq!(stats.profit_factor(), None);
        assert_eq!(stats.loss_share(), None);
        assert_eq!(stats.trades, 0);
    }

    #[test]
    fn flat_close_breaks_streak() {
        let stats = WindowStats::from_returns([-1.0, -1.0, 0.0, -1.0]);
        assert_eq!(stats.max_loss_streak, 2);
        assert_eq!(stats.trades, 4);
        assert_eq!(stats.profit_factor(), Some(0.0));
    }
}
