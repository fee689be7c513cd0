use super::rating_scale::Rating;
use super::transition::TransitionMatrix;

#[derive(Debug, Clone, Copy)]
pub struct RatingPathSimulator<'a> {
    matrix: &'a TransitionMatrix,
}

impl<'a> RatingPathSimulator<'a> {
    pub fn new(matrix: &'a TransitionMatrix) -> Self {
        RatingPathSimulator { matrix }
    }

    pub fn matrix(&self) -> &'a TransitionMatrix {
        self.matrix
    }

    /// Rating reached from `current` for a uniform `draw`.
    ///
    /// Picks the smallest column whose cumulative probability reaches the
    /// draw and that carries mass of its own, so a zero draw lands on the
    /// best reachable state rather than on an unreachable column of the row.
    /// DEFAULT is returned without looking at the draw, and a NaN draw falls
    /// through to DEFAULT.
    pub fn next_rating(&self, current: Rating, draw: f64) -> Rating {
        if current.is_default() {
            return Rating::Default;
        }
        let row = self.matrix.row(current);
        let mut prev = 0.0;
        for (j, &cum) in row.iter().enumerate() {
            if cum > prev && cum >= draw {
                return Rating::from_index(j).unwrap_or(Rating::Default);
            }
            prev = cum;
        }
        Rating::Default
    }

    /// String form of [`next_rating`](Self::next_rating). Unrecognised
    /// symbols are treated as DEFAULT.
    pub fn next_rating_symbol(&self, current: &str, draw: f64) -> &'static str {
        self.next_rating(Rating::from_symbol(Some(current)), draw)
            .symbol()
    }
}
