use std::time::Instant;

use crate::moves::moves::Move;

use super::MAX_PLY;

/// Everything that can end a search: a depth cap, hard and soft node caps,
/// a hard wall-clock bound and a soft one that node-based time management
/// scales per move.
#[derive(Clone)]
pub struct Limit {
    pub depth: i32,
    pub ctime: i64,
    pub movetime: i64,
    pub max_nodes: i64,
    pub soft_nodes: i64,
    pub inc: i64,
    pub softtime: i64,
    pub enable_clock: bool,
    pub timer: Instant,
    /// Nodes spent under each root move, indexed by the move's from/to bits
    pub node_counts: Box<[u64; 4096]>,
}

impl Default for Limit {
    fn default() -> Self {
        Self {
            depth: 0,
            ctime: 0,
            movetime: 0,
            max_nodes: -1,
            soft_nodes: -1,
            inc: 0,
            softtime: 0,
            enable_clock: true,
            timer: Instant::now(),
            node_counts: bytemuck::zeroed_box(),
        }
    }
}

impl Limit {
    /// Fixes up derived fields and starts the wall clock
    pub fn start(&mut self) {
        self.enable_clock = self.movetime != 0 || self.ctime != 0;
        if self.depth == 0 {
            self.depth = MAX_PLY - 5;
        }
        if self.enable_clock {
            self.softtime = 0;
        }
        if self.ctime != 0 {
            self.movetime = self.ctime / 2 - 50;
            self.softtime = 6 * (self.ctime / 20 + self.inc * 3 / 4) / 10;
        }
        self.timer = Instant::now();
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.timer.elapsed().as_millis() as i64
    }

    /// Soft-node mode, kept exactly as the original behaves: the hard node
    /// cap becomes the soft cap and the hard cap goes away entirely
    pub fn apply_soft_node_mode(&mut self) {
        self.soft_nodes = self.max_nodes.max(self.soft_nodes);
        self.max_nodes = -1;
    }

    pub fn update_nodes(&mut self, m: Move, nodes: u64) {
        self.node_counts[m.index() & 4095] += nodes;
    }

    pub fn out_of_nodes(&self, count: u64) -> bool {
        self.max_nodes != -1 && count as i64 > self.max_nodes
    }

    pub fn soft_nodes_exceeded(&self, count: u64) -> bool {
        self.soft_nodes != -1 && count as i64 > self.soft_nodes
    }

    pub fn out_of_time(&self) -> bool {
        self.enable_clock && self.elapsed_ms() >= self.movetime
    }

    /// Soft bound, stretched or shrunk by how much of the tree the best move
    /// soaked up: a move that dominates the node counts can stop early
    pub fn out_of_time_soft(&self, best_move: Move, total_nodes: u64) -> bool {
        if !self.enable_clock || self.softtime == 0 {
            return false;
        }
        let prop = self.node_counts[best_move.index() & 4095] as f64 / total_nodes.max(1) as f64;
        let scale = (1.5 - prop) * 1.35;
        self.elapsed_ms() as f64 >= self.softtime as f64 * scale
    }
}

#[cfg(test)]
mod limit_tests {
    use crate::moves::moves::MoveFlag;
    use crate::types::square::Square;

    use super::*;

    #[test]
    fn start_derives_clock_bounds() {
        let mut limit = Limit { ctime: 10_000, inc: 100, ..Limit::default() };
        limit.start();
        assert!(limit.enable_clock);
        assert_eq!(limit.movetime, 4_950);
        assert_eq!(limit.softtime, 6 * (500 + 75) / 10);
        assert_eq!(limit.depth, MAX_PLY - 5);
    }

    #[test]
    fn fixed_movetime_disables_soft_bound() {
        let mut limit = Limit { movetime: 500, ..Limit::default() };
        limit.start();
        assert!(limit.enable_clock);
        assert_eq!(limit.softtime, 0);
        let m = Move::new(Square(12), Square(28), MoveFlag::Normal);
        assert!(!limit.out_of_time_soft(m, 1));
    }

    #[test]
    fn node_caps() {
        let limit = Limit { max_nodes: 1000, soft_nodes: 500, ..Limit::default() };
        assert!(!limit.out_of_nodes(1000));
        assert!(limit.out_of_nodes(1001));
        assert!(limit.soft_nodes_exceeded(501));
        let unlimited = Limit::default();
        assert!(!unlimited.out_of_nodes(u64::MAX / 2));
    }

    #[test]
    fn soft_node_mode_swaps_the_caps() {
        let mut limit = Limit { max_nodes: 5_000, soft_nodes: -1, ..Limit::default() };
        limit.apply_soft_node_mode();
        assert_eq!(limit.soft_nodes, 5_000);
        assert_eq!(limit.max_nodes, -1);

        // An explicit soft cap larger than the hard cap wins
        let mut limit = Limit { max_nodes: 1_000, soft_nodes: 9_000, ..Limit::default() };
        limit.apply_soft_node_mode();
        assert_eq!(limit.soft_nodes, 9_000);
        assert_eq!(limit.max_nodes, -1);
    }

    #[test]
    fn node_tm_scales_with_best_move_share() {
        let mut limit = Limit { ctime: 1_000, ..Limit::default() };
        limit.start();
        let m = Move::new(Square(12), Square(28), MoveFlag::Normal);
        // All nodes under the best move: threshold shrinks to 0.5 * 1.35x
        limit.update_nodes(m, 1_000_000);
        let dominated = limit.softtime as f64 * (1.5 - 1.0) * 1.35;
        let spread = limit.softtime as f64 * 1.5 * 1.35;
        assert!(dominated < spread);
    }
}
