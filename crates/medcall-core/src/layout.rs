//! Video grid sizing. `n` always counts the local participant.

pub fn columns(n: usize) -> usize {
    match n {
        0..=2 => 1,
        3..=4 => 2,
        _ => 3,
    }
}

pub fn rows(n: usize) -> usize {
    n.div_ceil(columns(n))
}
