use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::board::board::Board;
use crate::engine::transposition::{TranspositionTable, DEFAULT_TT_MB};
use crate::engine::wdl;
use crate::eval::accumulator::{AccumulatorStack, InputBucketCache};
use crate::eval::network::Network;
use crate::moves::movegenerator::MGT;
use crate::moves::moves::Move;

use super::game_time::Limit;
use super::history::History;
use super::search::{is_win, iterative_deepening, FOUND_MATE, INFINITY, MATE};
use super::{PVLine, SearchStack};

/// Node batch flushed to the shared counter, which doubles as the polling
/// interval for time and node limits
const NODE_BATCH: u64 = 2048;

/// The driver-visible half of one worker: flags, the published result and
/// the aggregated node count
pub struct WorkerShared {
    pub stopped: AtomicBool,
    pub exiting: AtomicBool,
    pub nodes: AtomicU64,
    pub best_move: AtomicU16,
    pub best_score: AtomicI32,
    pub completed: AtomicI32,
    searching: Mutex<bool>,
    cond: Condvar,
}

impl Default for WorkerShared {
    fn default() -> Self {
        Self {
            stopped: AtomicBool::new(false),
            exiting: AtomicBool::new(false),
            nodes: AtomicU64::new(0),
            best_move: AtomicU16::new(0),
            best_score: AtomicI32::new(-INFINITY),
            completed: AtomicI32::new(0),
            searching: Mutex::new(false),
            cond: Condvar::new(),
        }
    }
}

/// Everything a worker needs for one search, copied out of the shared slot
/// when the idle barrier releases
#[derive(Clone)]
pub struct SearchJob {
    pub board: Board,
    pub limit: Limit,
    pub hash_history: Vec<u64>,
    pub tt: Arc<TranspositionTable>,
    pub net: Arc<Network>,
    pub print_info: bool,
    pub show_wdl: bool,
    pub normalize: bool,
}

/// Per-worker search state. Exclusively owned by its thread; the driver only
/// sees the `WorkerShared` half.
pub struct ThreadData {
    pub board: Board,
    pub stack: SearchStack,
    pub history: History,
    pub accumulators: AccumulatorStack,
    pub bucket_cache: InputBucketCache,
    pub hash_history: Vec<u64>,
    pub limit: Limit,
    pub tt: Arc<TranspositionTable>,
    pub net: Arc<Network>,
    pub shared: Arc<WorkerShared>,
    siblings: Vec<Arc<WorkerShared>>,
    pub thread_id: usize,
    pub min_nmp_ply: i32,
    pub root_depth: i32,
    pub completed: i32,
    pub sel_depth: i32,
    pub best_move: Move,
    pub best_score: i32,
    pub print_info: bool,
    pub show_wdl: bool,
    pub normalize: bool,
    local_nodes: u64,
    batch_nodes: u64,
}

impl ThreadData {
    fn new(thread_id: usize, shared: Arc<WorkerShared>, siblings: Vec<Arc<WorkerShared>>, job: &SearchJob) -> Self {
        Self {
            board: job.board,
            stack: SearchStack::default(),
            history: History::default(),
            accumulators: AccumulatorStack::new(),
            bucket_cache: InputBucketCache::default(),
            hash_history: job.hash_history.clone(),
            limit: job.limit.clone(),
            tt: Arc::clone(&job.tt),
            net: Arc::clone(&job.net),
            shared,
            siblings,
            thread_id,
            min_nmp_ply: 0,
            root_depth: 0,
            completed: 0,
            sel_depth: 0,
            best_move: Move::NONE,
            best_score: -INFINITY,
            print_info: job.print_info,
            show_wdl: job.show_wdl,
            normalize: job.normalize,
            local_nodes: 0,
            batch_nodes: 0,
        }
    }

    /// Fresh histories, counters and stacks for a new search. The
    /// transposition table carries over.
    fn new_search(&mut self, job: &SearchJob) {
        self.board = job.board;
        self.hash_history.clone_from(&job.hash_history);
        self.limit = job.limit.clone();
        self.tt = Arc::clone(&job.tt);
        self.net = Arc::clone(&job.net);
        self.print_info = job.print_info;
        self.show_wdl = job.show_wdl;
        self.normalize = job.normalize;
        self.history.clear();
        self.bucket_cache.clear();
        self.stack = SearchStack::default();
        self.min_nmp_ply = 0;
        self.root_depth = 0;
        self.completed = 0;
        self.sel_depth = 0;
        self.best_move = Move::NONE;
        self.best_score = -INFINITY;
        self.local_nodes = 0;
        self.batch_nodes = 0;
        self.shared.nodes.store(0, Ordering::Relaxed);
        self.shared.best_move.store(0, Ordering::Relaxed);
        self.shared.best_score.store(-INFINITY, Ordering::Relaxed);
        self.shared.completed.store(0, Ordering::Relaxed);
    }

    pub fn main_thread(&self) -> bool {
        self.thread_id == 0
    }

    pub fn stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Relaxed)
    }

    /// Cooperative stop for every worker in the pool
    pub fn stop_all(&self) {
        for sibling in &self.siblings {
            sibling.stopped.store(true, Ordering::Relaxed);
        }
    }

    pub fn increment_nodes(&mut self) {
        self.batch_nodes += 1;
        if self.batch_nodes >= NODE_BATCH {
            self.local_nodes += self.batch_nodes;
            self.shared.nodes.fetch_add(self.batch_nodes, Ordering::Relaxed);
            self.batch_nodes = 0;
        }
    }

    /// Limit polling happens on batch boundaries, every 2048 nodes
    pub fn should_check_limits(&self) -> bool {
        self.batch_nodes == 0
    }

    pub fn nodes_local(&self) -> u64 {
        self.local_nodes + self.batch_nodes
    }

    fn flush_nodes(&mut self) {
        self.local_nodes += self.batch_nodes;
        self.shared.nodes.fetch_add(self.batch_nodes, Ordering::Relaxed);
        self.batch_nodes = 0;
    }

    /// One prior occurrence of the current position within the fifty-move
    /// window counts as a draw during search
    pub fn is_repetition(&self, board: &Board) -> bool {
        if self.hash_history.len() < 4 {
            return false;
        }
        let mut seen = 0;
        for &hash in self.hash_history.iter().rev().take(board.half_moves as usize + 1) {
            if hash == board.zobrist_hash {
                seen += 1;
                if seen == 2 {
                    return true;
                }
            }
        }
        false
    }

    /// Resolves the accumulator chain at the current ply and runs the net
    pub fn evaluate(&mut self, board: &Board) -> i32 {
        let net = Arc::clone(&self.net);
        self.accumulators.evaluate(&net, board)
    }

    /// Propagates sub-keys into the child frame, records the accumulator
    /// delta and pushes the new position onto the line history
    pub fn make_move(&mut self, old: &Board, new: &Board, m: Move, ply: i32) {
        let net = Arc::clone(&self.net);
        let keys = self.stack.frame(ply).keys.advance(old, m);
        self.stack.frame_mut(ply + 1).keys = keys;
        self.accumulators.push_move(&net, old, new, m, &mut self.bucket_cache);
        self.hash_history.push(new.zobrist_hash);
    }

    pub fn unmake_move(&mut self) {
        self.accumulators.pop();
        self.hash_history.pop();
    }

    pub fn publish_iteration(&self) {
        self.shared.best_move.store(self.best_move.as_u16(), Ordering::Relaxed);
        self.shared.best_score.store(self.best_score, Ordering::Relaxed);
        self.shared.completed.store(self.completed, Ordering::Relaxed);
    }

    pub fn print_search_info(&self, score: i32, pv: &PVLine, board: &Board) {
        let nodes: u64 = self.siblings.iter().map(|s| s.nodes.load(Ordering::Relaxed)).sum::<u64>()
            + self.batch_nodes;
        let ms = self.limit.elapsed_ms().max(1) as u64;
        print!(
            "info depth {} seldepth {} score ",
            self.root_depth, self.sel_depth,
        );
        if score.abs() >= FOUND_MATE {
            let mate_in = (MATE - score.abs()) / 2 + 1;
            print!("mate {}{mate_in}", if score < 0 { "-" } else { "" });
        } else {
            let mut pv_board = *board;
            for m in pv.iter() {
                if !pv_board.make_move(*m) {
                    break;
                }
            }
            let shown = if self.normalize { wdl::normalize_eval(score, &pv_board) } else { score };
            print!("cp {shown}");
            if self.show_wdl {
                let (w, d, l) = wdl::compute_wdl(score, &pv_board);
                print!(" wdl {w} {d} {l}");
            }
        }
        print!(
            " hashfull {} nodes {nodes} nps {} time {ms} pv",
            self.tt.hashfull(),
            nodes * 1000 / ms,
        );
        for m in pv.iter() {
            print!(" {}", m.to_uci(board.chess960));
        }
        println!();
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        let shared = Arc::new(WorkerShared::default());
        let job = SearchJob {
            board: Board::default(),
            limit: Limit::default(),
            hash_history: vec![Board::default().zobrist_hash],
            tt: Arc::new(TranspositionTable::new(2)),
            net: Arc::from(bytemuck::zeroed_box::<Network>()),
            print_info: false,
            show_wdl: false,
            normalize: false,
        };
        Self::new(0, Arc::clone(&shared), vec![shared], &job)
    }
}

struct Worker {
    shared: Arc<WorkerShared>,
    handle: Option<JoinHandle<()>>,
}

/// Owns the worker pool and the shared search state. `go` hands a job to
/// every worker through one barrier; finished workers collect at another.
pub struct Searcher {
    pub tt: Arc<TranspositionTable>,
    pub net: Arc<Network>,
    workers: Vec<Worker>,
    job: Arc<Mutex<SearchJob>>,
    idle_barrier: Arc<Barrier>,
    result: Arc<Mutex<(Move, i32)>>,
    pub show_wdl: bool,
    pub use_soft_nodes: bool,
    pub normalize: bool,
    pub print_info: bool,
}

impl Searcher {
    pub fn new(net: Arc<Network>) -> Self {
        let tt = Arc::new(TranspositionTable::new(DEFAULT_TT_MB));
        let job = Arc::new(Mutex::new(SearchJob {
            board: Board::default(),
            limit: Limit::default(),
            hash_history: vec![Board::default().zobrist_hash],
            tt: Arc::clone(&tt),
            net: Arc::clone(&net),
            print_info: true,
            show_wdl: true,
            normalize: true,
        }));
        let mut searcher = Self {
            tt,
            net,
            workers: Vec::new(),
            job,
            idle_barrier: Arc::new(Barrier::new(1)),
            result: Arc::new(Mutex::new((Move::NONE, -INFINITY))),
            show_wdl: true,
            use_soft_nodes: false,
            normalize: true,
            print_info: true,
        };
        searcher.set_threads(1);
        searcher
    }

    /// Tears the pool down and spawns a fresh one
    pub fn set_threads(&mut self, count: usize) {
        let count = count.clamp(1, 1024);
        self.teardown();

        let shareds: Vec<Arc<WorkerShared>> = (0..count).map(|_| Arc::new(WorkerShared::default())).collect();
        self.idle_barrier = Arc::new(Barrier::new(count + 1));
        let stop_barrier = Arc::new(Barrier::new(count));

        for id in 0..count {
            let shared = Arc::clone(&shareds[id]);
            let siblings = shareds.clone();
            let job = Arc::clone(&self.job);
            let idle = Arc::clone(&self.idle_barrier);
            let stop = Arc::clone(&stop_barrier);
            let result = Arc::clone(&self.result);
            let handle = std::thread::Builder::new()
                .name(format!("vesper-worker-{id}"))
                .stack_size(32 * 1024 * 1024)
                .spawn(move || worker_loop(id, shared, siblings, job, idle, stop, result))
                .expect("failed to spawn worker");
            self.workers.push(Worker { shared: Arc::clone(&shareds[id]), handle: Some(handle) });
        }
    }

    fn teardown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.stop();
        self.wait_for_search_finished();
        for worker in &self.workers {
            worker.shared.exiting.store(true, Ordering::Relaxed);
        }
        self.idle_barrier.wait();
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
        self.workers.clear();
    }

    /// Hands the position to the pool and releases it through the idle
    /// barrier. Returns immediately; the main worker reports the best move.
    pub fn start_search(&mut self, board: &Board, mut limit: Limit, hash_history: Vec<u64>) {
        self.stop();
        self.wait_for_search_finished();

        if self.use_soft_nodes {
            limit.apply_soft_node_mode();
        }
        limit.start();

        for worker in &self.workers {
            worker.shared.stopped.store(false, Ordering::Relaxed);
            *worker.shared.searching.lock().unwrap() = true;
        }
        {
            let mut job = self.job.lock().unwrap();
            job.board = *board;
            job.limit = limit;
            job.hash_history = hash_history;
            job.tt = Arc::clone(&self.tt);
            job.net = Arc::clone(&self.net);
            job.print_info = self.print_info;
            job.show_wdl = self.show_wdl;
            job.normalize = self.normalize;
        }
        self.idle_barrier.wait();
    }

    pub fn stop(&self) {
        for worker in &self.workers {
            worker.shared.stopped.store(true, Ordering::Relaxed);
        }
    }

    pub fn wait_for_search_finished(&self) {
        for worker in &self.workers {
            let mut searching = worker.shared.searching.lock().unwrap();
            while *searching {
                searching = worker.shared.cond.wait(searching).unwrap();
            }
        }
    }

    pub fn node_count(&self) -> u64 {
        self.workers.iter().map(|w| w.shared.nodes.load(Ordering::Relaxed)).sum()
    }

    /// Best move and score of the last finished search
    pub fn result(&self) -> (Move, i32) {
        *self.result.lock().unwrap()
    }

    pub fn resize_tt(&mut self, mb: usize) {
        self.tt = Arc::new(TranspositionTable::new(mb));
    }

    pub fn reset(&mut self) {
        self.wait_for_search_finished();
        self.tt.clear();
        *self.result.lock().unwrap() = (Move::NONE, -INFINITY);
    }
}

impl Drop for Searcher {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    id: usize,
    shared: Arc<WorkerShared>,
    siblings: Vec<Arc<WorkerShared>>,
    job_slot: Arc<Mutex<SearchJob>>,
    idle_barrier: Arc<Barrier>,
    stop_barrier: Arc<Barrier>,
    result: Arc<Mutex<(Move, i32)>>,
) {
    let mut td: Option<ThreadData> = None;
    loop {
        idle_barrier.wait();
        if shared.exiting.load(Ordering::Relaxed) {
            return;
        }

        let job = job_slot.lock().unwrap().clone();
        let td = match &mut td {
            Some(td) => {
                td.new_search(&job);
                td
            }
            none => none.insert(ThreadData::new(id, Arc::clone(&shared), siblings.clone(), &job)),
        };

        iterative_deepening(td);
        td.flush_nodes();
        td.publish_iteration();

        // First worker out stops the rest, then everyone meets at the stop
        // barrier before results are read
        td.stop_all();

        if td.main_thread() {
            stop_barrier.wait();
            let (best_move, best_score) = elect_best_worker(&td.board, &siblings);
            *result.lock().unwrap() = (best_move, best_score);
            if job.print_info {
                println!("bestmove {}", best_move.to_uci(td.board.chess960));
            }
            td.tt.age_up();
        } else {
            stop_barrier.wait();
        }

        let mut searching = shared.searching.lock().unwrap();
        *searching = false;
        shared.cond.notify_all();
    }
}

/// Picks the worker whose result to trust: deeper completed searches win
/// unless that would throw away a proven win, equal depths go to the higher
/// score
fn elect_best_worker(board: &Board, workers: &[Arc<WorkerShared>]) -> (Move, i32) {
    let read = |w: &Arc<WorkerShared>| {
        (Move(w.best_move.load(Ordering::Relaxed)), w.best_score.load(Ordering::Relaxed), w.completed.load(Ordering::Relaxed))
    };
    let (mut best_move, mut best_score, mut best_depth) = read(&workers[0]);
    for worker in &workers[1..] {
        let (m, score, depth) = read(worker);
        if m == Move::NONE || !board.is_pseudo_legal(m) {
            continue;
        }
        if (depth == best_depth && score > best_score) || (is_win(score) && score > best_score) {
            (best_move, best_score, best_depth) = (m, score, depth);
        }
        if depth > best_depth && (score > best_score || !is_win(best_score)) {
            (best_move, best_score, best_depth) = (m, score, depth);
        }
    }
    if best_move == Move::NONE {
        // Never report a null move while any legal move exists
        for entry in board.generate_moves(MGT::All).iter() {
            let mut copy = *board;
            if copy.make_move(entry.m) {
                return (entry.m, best_score);
            }
        }
    }
    (best_move, best_score)
}

#[cfg(test)]
mod thread_tests {
    use super::*;

    #[test]
    fn pool_starts_stops_and_restarts() {
        let net: Arc<Network> = Arc::from(bytemuck::zeroed_box::<Network>());
        let mut searcher = Searcher::new(net);
        searcher.print_info = false;
        let board = Board::default();

        let limit = Limit { soft_nodes: 2_000, ..Limit::default() };
        searcher.start_search(&board, limit, vec![board.zobrist_hash]);
        searcher.wait_for_search_finished();
        let (best, _) = searcher.result();
        assert_ne!(best, Move::NONE);
        assert!(searcher.node_count() > 0);

        // The pool survives a thread-count change and another search
        searcher.set_threads(2);
        let limit = Limit { soft_nodes: 2_000, ..Limit::default() };
        searcher.start_search(&board, limit, vec![board.zobrist_hash]);
        searcher.wait_for_search_finished();
        assert_ne!(searcher.result().0, Move::NONE);
    }

    #[test]
    fn repetition_counting() {
        let td = ThreadData::for_tests();
        let board = Board::default();
        assert!(!td.is_repetition(&board));

        let mut td = ThreadData::for_tests();
        let mut looped = board;
        looped.half_moves = 8;
        td.hash_history = vec![looped.zobrist_hash, 1, 2, looped.zobrist_hash];
        assert!(td.is_repetition(&looped));
    }
}
