use crate::board::board::Board;
use crate::board::zobrist::SubKeys;
use crate::engine::transposition::Bound;
use crate::moves::movelist::{MoveListEntry, MAX_LEN};
use crate::moves::movepicker::MovePicker;
use crate::moves::moves::Move;
use crate::search::history::History;
use crate::spsa::{
    lmr_convolution, ASP_WIDENING_FACTOR, CORRHIST_BONUS_WEIGHT, INITIAL_ASP_WINDOW, IIR_MIN_DEPTH,
    LMP_MIN_MOVES_BASE, LMR_BASE_SCALE, LMR_DEEPER_BASE, LMR_DEEPER_SCALE, LMR_HIST_DIVISOR, LMR_MIN_DEPTH,
    LMR_MIN_MOVECOUNT, MIN_ASP_WINDOW_DEPTH, NMP_BASE_REDUCTION, NMP_EVAL_SCALE, NMP_REDUCTION_SCALE,
    RAZORING_SCALE, RFP_MARGIN, RFP_MAX_DEPTH, SEE_PRUNING_SCALAR, SE_BETA_SCALE, SE_DOUBLE_MARGIN, SE_MIN_DEPTH,
};

use arrayvec::ArrayVec;

use super::cuckoo::upcoming_repetition;
use super::see::see;
use super::thread::ThreadData;
use super::{base_reduction, MAX_PLY, PVLine};

pub const INFINITY: i32 = 32_767;
pub const MATE: i32 = 32_766;
pub const FOUND_MATE: i32 = MATE - MAX_PLY;

pub const fn is_win(score: i32) -> bool {
    score >= FOUND_MATE
}

pub const fn is_loss(score: i32) -> bool {
    score <= -FOUND_MATE
}

pub const fn is_mate_score(score: i32) -> bool {
    is_win(score) || is_loss(score)
}

/// Ramps depth one ply at a time, re-using each iteration's move ordering
/// and table entries to make the next one cheap. Returns the best move and
/// score of the deepest completed iteration.
pub fn iterative_deepening(td: &mut ThreadData) -> (Move, i32) {
    let board = td.board;
    let net = std::sync::Arc::clone(&td.net);
    td.accumulators.reset(&net, &board, &mut td.bucket_cache);

    let mut last_score = -INFINITY;
    let mut last_pv = PVLine::default();
    let max_depth = td.limit.depth;

    for depth in 1..=max_depth {
        td.root_depth = depth;
        td.sel_depth = 0;
        td.stack.frame_mut(0).keys = SubKeys::from_board(&board);

        let mut score = last_score;
        if depth >= MIN_ASP_WINDOW_DEPTH.val() {
            let mut delta = INITIAL_ASP_WINDOW.val();
            let mut alpha = (last_score - delta).max(-INFINITY);
            let mut beta = (last_score + delta).min(INFINITY);
            let mut asp_depth = depth;
            while !aborted(td) {
                score = negamax::<true>(td, &board, asp_depth.max(1), 0, alpha, beta, false);
                if score <= alpha {
                    // Trust nothing from a fail low: full window and depth
                    beta = (alpha + beta) / 2;
                    alpha = (alpha - delta).max(-INFINITY);
                    asp_depth = depth;
                } else if score >= beta {
                    beta = (beta + delta).min(INFINITY);
                    asp_depth = (asp_depth - 1).max(depth - 5);
                } else {
                    break;
                }
                delta += delta * ASP_WIDENING_FACTOR.val() / 16;
            }
        } else {
            score = negamax::<true>(td, &board, depth, 0, -INFINITY, INFINITY, false);
        }

        // The first iteration always completes so a best move exists
        if depth != 1 && aborted(td) {
            break;
        }

        last_score = score;
        last_pv = td.stack.frame(0).pv;
        td.completed = depth;
        td.publish_iteration();

        if td.main_thread() {
            if td.print_info {
                td.print_search_info(last_score, &last_pv, &board);
            }
            if td.limit.out_of_time_soft(last_pv.first(), td.nodes_local()) {
                break;
            }
        }
    }

    if last_pv.first() != Move::NONE {
        td.best_move = last_pv.first();
    }
    td.best_score = last_score;
    td.publish_iteration();
    (td.best_move, last_score)
}

fn aborted(td: &ThreadData) -> bool {
    if td.stopped() {
        return true;
    }
    if td.main_thread() {
        td.limit.out_of_time()
            || td.limit.out_of_nodes(td.nodes_local())
            || td.limit.soft_nodes_exceeded(td.nodes_local())
    } else {
        td.limit.soft_nodes_exceeded(td.nodes_local())
    }
}

/// Does the stored score, given its bound, prove anything against this
/// window?
fn cutoff_allowed(bound: Bound, score: i32, alpha: i32, beta: i32) -> bool {
    match bound {
        Bound::None => false,
        Bound::Exact => true,
        Bound::Lower => score >= beta,
        Bound::Upper => score <= alpha,
    }
}

/// Alpha-beta in negamax form. `IS_PV` is compiled out into two variants so
/// the non-PV path carries no window bookkeeping it does not need; `cutnode`
/// marks nodes expected to fail high, which get reduced harder.
#[allow(clippy::too_many_lines)]
fn negamax<const IS_PV: bool>(
    td: &mut ThreadData,
    board: &Board,
    mut depth: i32,
    ply: i32,
    mut alpha: i32,
    beta: i32,
    cutnode: bool,
) -> i32 {
    let is_root = ply == 0;

    if IS_PV {
        td.stack.frame_mut(ply).pv.clear();
    }

    if depth <= 0 {
        return qsearch::<IS_PV>(td, board, ply, alpha, beta);
    }

    let excluded = td.stack.frame(ply).excluded;
    let singular_search = excluded != Move::NONE;
    td.sel_depth = td.sel_depth.max(ply);

    if !is_root {
        if board.is_draw() || td.is_repetition(board) {
            return 0;
        }
        // A reachable repetition means at least a draw is in hand
        if alpha < 0 && upcoming_repetition(board, &td.hash_history) {
            alpha = 0;
            if alpha >= beta {
                return 0;
            }
        }

        if td.stopped() {
            return 0;
        }
        if td.main_thread()
            && td.should_check_limits()
            && td.root_depth > 1
            && (td.limit.out_of_time() || td.limit.out_of_nodes(td.nodes_local()))
        {
            td.stop_all();
            return 0;
        }

        if ply >= MAX_PLY - 1 {
            return if board.in_check() { 0 } else { td.evaluate(board) };
        }
    }

    let entry = if singular_search { None } else { td.tt.get(board.zobrist_hash) };
    let tt_hit = entry.is_some();
    let mut tt_move = Move::NONE;
    let mut tt_score = -INFINITY;
    let mut tt_depth = 0;
    let mut tt_bound = Bound::None;
    let mut tt_static = -INFINITY;
    if let Some(e) = entry {
        tt_move = e.best_move();
        tt_score = e.score();
        tt_depth = e.depth();
        tt_bound = e.bound();
        tt_static = e.static_eval();
    }

    if !IS_PV && tt_hit && tt_depth >= depth && cutoff_allowed(tt_bound, tt_score, alpha, beta) {
        return tt_score;
    }
    let tt_pv = IS_PV || entry.map_or(false, |e| e.was_pv());

    let in_check = board.in_check();
    td.stack.frame_mut(ply).conthist = None;

    let mut raw_eval = -INFINITY;
    if !singular_search {
        if in_check {
            td.stack.frame_mut(ply).static_eval = -INFINITY;
            td.stack.frame_mut(ply).eval = -INFINITY;
        } else {
            raw_eval = if tt_hit && tt_static != -INFINITY { tt_static } else { td.evaluate(board) };
            let keys = td.stack.frame(ply).keys;
            let corrected = td.history.correct_static_eval(board, &keys, raw_eval);
            let frame = td.stack.frame_mut(ply);
            frame.static_eval = corrected;
            frame.eval = corrected;
            // A table score bounded on the right side is a better guess
            // than the static eval alone
            if tt_hit && cutoff_allowed(tt_bound, tt_score, corrected, corrected) && tt_score != -INFINITY {
                frame.eval = tt_score;
            }
        }
    }
    let static_eval = td.stack.frame(ply).static_eval;
    let eval = td.stack.frame(ply).eval;

    let improving = !in_check && ply > 1 && td.stack.frame(ply - 2).static_eval < static_eval;

    if !is_root && !IS_PV && !in_check && !singular_search {
        // Reverse futility: far enough above beta that quiet play keeps us
        // there
        if depth <= RFP_MAX_DEPTH.val() && eval - RFP_MARGIN.val() * (depth - i32::from(improving)) >= beta {
            return eval;
        }

        // Razoring: hopeless static eval, confirm with a capture search
        if depth <= 4 && alpha.abs() < 2000 && static_eval + RAZORING_SCALE.val() * depth <= alpha {
            let score = qsearch::<false>(td, board, ply, alpha, alpha + 1);
            if score <= alpha {
                return score;
            }
        }

        // Null move: hand over the move and search reduced; only worth
        // trying with non-pawn material on the board
        if depth >= 2 && eval >= beta && ply > td.min_nmp_ply && board.has_non_pawns(board.stm) {
            let r = NMP_BASE_REDUCTION.val()
                + depth / NMP_REDUCTION_SCALE.val()
                + ((eval - beta) / NMP_EVAL_SCALE.val()).min(2);

            let mut nulled = *board;
            nulled.make_null_move();
            td.tt.prefetch(nulled.zobrist_hash);
            td.make_move(board, &nulled, Move::NULL_MOVE, ply);
            let null_score = -negamax::<false>(td, &nulled, depth - r, ply + 1, -beta, -beta + 1, !cutnode);
            td.unmake_move();

            if null_score >= beta {
                if depth <= 15 || td.min_nmp_ply > 0 {
                    return if is_win(null_score) { beta } else { null_score };
                }
                // Zugzwang verification: a reduced real search from the same
                // frame has to confirm the fail high. The frame's excluded
                // move and conthist are reinitialised on re-entry, so the
                // caller's state survives.
                td.min_nmp_ply = ply + (depth - r) * 3 / 4;
                let verification = negamax::<false>(td, board, depth - NMP_BASE_REDUCTION.val(), ply, beta - 1, beta, true);
                td.min_nmp_ply = 0;
                if verification >= beta {
                    return verification;
                }
            }
        }
    }

    // With no table move to try first, a shallower search that finds one is
    // cheaper than ordering blind at full depth
    if tt_move == Move::NONE && depth >= IIR_MIN_DEPTH.val() && !in_check && !singular_search {
        depth -= 1;
    }

    let mut best_score = -INFINITY;
    let mut best_move = Move::NONE;
    let mut bound = Bound::Upper;
    let mut moves_searched = 0;
    let killer = td.stack.frame(ply).killer;
    let mut picker = MovePicker::new(tt_move, killer, ply);
    let mut quiets_tried = ArrayVec::<Move, MAX_LEN>::new();
    let mut captures_tried = ArrayVec::<Move, MAX_LEN>::new();

    while let Some(MoveListEntry { m, .. }) = picker.next(board, td) {
        if m == excluded {
            continue;
        }
        if td.stopped() {
            return best_score.max(-MATE + ply);
        }
        let is_quiet = !board.is_capture(m);

        if !is_root && !is_loss(best_score) {
            // Late move pruning: behind a well-ordered move list, the tail
            // is noise
            if !IS_PV
                && !in_check
                && is_quiet
                && moves_searched >= LMP_MIN_MOVES_BASE.val() + depth * depth / (2 - i32::from(improving))
            {
                break;
            }

            // Static exchange pruning
            if !see(board, m, SEE_PRUNING_SCALAR.val() * depth) {
                continue;
            }
        }

        // Singular extension: when the table move beats a lowered bound that
        // every other move fails, it earns extra depth; if the position
        // holds up without it, the table move was not special after all
        let mut extension = 0;
        if !is_root
            && !singular_search
            && depth >= SE_MIN_DEPTH.val()
            && m == tt_move
            && tt_depth >= depth - 3
            && tt_bound != Bound::Upper
            && !is_mate_score(tt_score)
        {
            let s_beta = (tt_score - SE_BETA_SCALE.val() * depth / 16).max(-MATE);
            let s_depth = (depth - 1) / 2;
            td.stack.frame_mut(ply).excluded = m;
            let s_score = negamax::<false>(td, board, s_depth, ply, s_beta - 1, s_beta, cutnode);
            td.stack.frame_mut(ply).excluded = Move::NONE;

            if s_score < s_beta {
                extension = if !IS_PV && s_score < s_beta - SE_DOUBLE_MARGIN.val() { 2 } else { 1 };
            } else if tt_score >= beta {
                extension = -2 + i32::from(IS_PV);
            }
        }

        let mut next = *board;
        if !next.make_move(m) {
            continue;
        }
        td.tt.prefetch(next.zobrist_hash);

        if is_quiet {
            quiets_tried.push(m);
        } else {
            captures_tried.push(m);
        }
        let hist_score = if is_quiet {
            td.history.quiet_history(board, m, &td.stack, ply)
        } else {
            td.history.capthist(board, m)
        };
        td.stack.frame_mut(ply).history_score = hist_score;
        td.stack.frame_mut(ply).conthist = Some(History::conthist_index(board, m));

        let nodes_before = td.nodes_local();
        td.make_move(board, &next, m, ply);
        td.increment_nodes();
        moves_searched += 1;

        let new_depth = depth + extension - 1;
        let mut score = -INFINITY;

        // Late move reductions: late, unremarkable moves get a zero-window
        // look at reduced depth first
        if depth >= LMR_MIN_DEPTH.val() && moves_searched > LMR_MIN_MOVECOUNT.val() + i32::from(is_root) {
            let mut r = LMR_BASE_SCALE.val() * base_reduction(is_quiet && m.promotion().is_none(), depth, moves_searched);
            r += lmr_convolution([is_quiet, !IS_PV, improving, cutnode, tt_pv, tt_hit]);
            r -= 1024 * hist_score / LMR_HIST_DIVISOR.val();
            r /= 1024;

            let lmr_depth = new_depth.min((new_depth - r).max(1));
            score = -negamax::<false>(td, &next, lmr_depth, ply + 1, -alpha - 1, -alpha, true);

            if score > alpha && lmr_depth < new_depth {
                let do_deeper = score > best_score + LMR_DEEPER_BASE.val() + LMR_DEEPER_SCALE.val() * new_depth;
                let do_shallower = score < best_score + new_depth;
                let adjusted = new_depth + i32::from(do_deeper) - i32::from(do_shallower);
                score = -negamax::<false>(td, &next, adjusted, ply + 1, -alpha - 1, -alpha, !cutnode);
            }
        } else if !IS_PV || moves_searched > 1 {
            score = -negamax::<false>(td, &next, new_depth, ply + 1, -alpha - 1, -alpha, !cutnode);
        }

        if IS_PV && (moves_searched == 1 || score > alpha) {
            score = -negamax::<true>(td, &next, new_depth, ply + 1, -beta, -alpha, false);
        }

        td.unmake_move();

        if is_root && td.main_thread() {
            td.limit.update_nodes(m, td.nodes_local() - nodes_before);
        }

        if score > best_score {
            best_score = score;
            if score > alpha {
                best_move = m;
                bound = Bound::Exact;
                alpha = score;
                if is_root {
                    td.best_move = m;
                    td.best_score = best_score;
                }
                if IS_PV {
                    td.stack.update_pv(ply, m);
                }
            }
        }

        if score >= beta {
            bound = Bound::Lower;
            td.stack.frame_mut(ply).killer = if is_quiet { m } else { Move::NONE };
            td.history.update(board, m, &quiets_tried, &captures_tried, depth, &td.stack, ply);
            break;
        }
    }

    if moves_searched == 0 {
        return if singular_search {
            alpha
        } else if in_check {
            // Deeper mates score closer to zero so the shortest one wins
            -MATE + ply
        } else {
            0
        };
    }

    if !singular_search {
        let best_is_quiet = best_move == Move::NONE || !board.is_capture(best_move);
        let eval_consistent = match bound {
            Bound::Exact => true,
            Bound::Lower => best_score > static_eval,
            Bound::Upper => best_score < static_eval,
            Bound::None => false,
        };
        if !in_check && best_is_quiet && eval_consistent {
            let bonus = CORRHIST_BONUS_WEIGHT.val() * (best_score - static_eval) * depth / 8 / 100;
            let keys = td.stack.frame(ply).keys;
            td.history.update_corrhist(board, &keys, bonus);
        }

        td.tt.store(
            board.zobrist_hash,
            best_move,
            depth,
            bound,
            best_score,
            tt_pv,
            raw_eval.clamp(-INFINITY, INFINITY),
        );
    }

    best_score
}

/// Captures-only search at the horizon, plus full evasion generation while
/// in check. Keeps tactical noise out of the static evaluation.
fn qsearch<const IS_PV: bool>(td: &mut ThreadData, board: &Board, ply: i32, mut alpha: i32, beta: i32) -> i32 {
    if td.stopped() {
        return 0;
    }
    if td.main_thread()
        && td.should_check_limits()
        && (td.limit.out_of_time() || td.limit.out_of_nodes(td.nodes_local()))
    {
        td.stop_all();
        return 0;
    }

    if ply >= MAX_PLY - 1 {
        return if board.in_check() { 0 } else { td.evaluate(board) };
    }
    td.sel_depth = td.sel_depth.max(ply);

    let entry = td.tt.get(board.zobrist_hash);
    let mut tt_move = Move::NONE;
    if let Some(e) = entry {
        if !IS_PV && cutoff_allowed(e.bound(), e.score(), alpha, beta) {
            return e.score();
        }
        tt_move = e.best_move();
    }
    let tt_pv = IS_PV || entry.map_or(false, |e| e.was_pv());

    let in_check = board.in_check();
    let raw_eval;
    let eval;
    if in_check {
        raw_eval = -INFINITY;
        eval = -INFINITY + ply;
    } else {
        let tt_static = entry.map_or(-INFINITY, |e| e.static_eval());
        raw_eval = if tt_static != -INFINITY { tt_static } else { td.evaluate(board) };
        let keys = td.stack.frame(ply).keys;
        let corrected = td.history.correct_static_eval(board, &keys, raw_eval);
        eval = match entry {
            Some(e) if e.score() != -INFINITY && cutoff_allowed(e.bound(), e.score(), corrected, corrected) => {
                e.score()
            }
            _ => corrected,
        };

        // Stand pat: doing nothing is an option at a quiet horizon
        if eval >= beta {
            return eval;
        }
        alpha = alpha.max(eval);
    }

    let mut best_score = eval;
    let mut best_move = Move::NONE;
    let mut bound = Bound::Upper;
    let mut moves_searched = 0;
    let mut picker = MovePicker::qsearch(tt_move, in_check, ply);

    while let Some(MoveListEntry { m, .. }) = picker.next(board, td) {
        if td.stopped() {
            return best_score;
        }
        if !is_loss(best_score) && !see(board, m, 0) {
            continue;
        }

        let mut next = *board;
        if !next.make_move(m) {
            continue;
        }
        td.tt.prefetch(next.zobrist_hash);
        td.stack.frame_mut(ply).conthist = Some(History::conthist_index(board, m));
        td.make_move(board, &next, m, ply);
        td.increment_nodes();
        moves_searched += 1;

        let score = -qsearch::<IS_PV>(td, &next, ply + 1, -beta, -alpha);
        td.unmake_move();

        if score > best_score {
            best_score = score;
            if score > alpha {
                alpha = score;
                best_move = m;
                bound = Bound::Exact;
                if IS_PV {
                    td.stack.update_pv(ply, m);
                }
            }
        }
        if score >= beta {
            bound = Bound::Lower;
            break;
        }
    }

    if in_check && moves_searched == 0 {
        return -MATE + ply;
    }

    td.tt.store(
        board.zobrist_hash,
        best_move,
        0,
        bound,
        best_score,
        tt_pv,
        raw_eval.clamp(-INFINITY, INFINITY),
    );

    best_score
}

#[cfg(test)]
mod search_tests {
    use crate::board::fen::{build_board, STARTING_FEN};
    use crate::moves::movegenerator::legal_move_count;
    use crate::search::fill_lmr_table;
    use crate::search::game_time::Limit;
    use crate::search::thread::ThreadData;

    use super::*;

    fn run_search(fen: &str, limit: Limit) -> (Move, i32, u64) {
        fill_lmr_table();
        let mut td = ThreadData::for_tests();
        let board = build_board(fen);
        td.board = board;
        td.hash_history = vec![board.zobrist_hash];
        td.limit = limit;
        td.limit.start();
        let (best, score) = iterative_deepening(&mut td);
        (best, score, td.nodes_local())
    }

    fn depth_limit(depth: i32) -> Limit {
        Limit { depth, enable_clock: false, ..Limit::default() }
    }

    #[test]
    fn returns_a_legal_opening_move() {
        let limit = Limit { soft_nodes: 10_000, ..Limit::default() };
        let (best, _, nodes) = run_search(STARTING_FEN, limit);
        let board = build_board(STARTING_FEN);
        assert!(board.is_pseudo_legal(best));
        let mut copy = board;
        assert!(copy.make_move(best));
        assert!(nodes > 0);
    }

    #[test]
    fn one_thread_search_is_deterministic() {
        let (best_a, score_a, nodes_a) = run_search(STARTING_FEN, depth_limit(6));
        let (best_b, score_b, nodes_b) = run_search(STARTING_FEN, depth_limit(6));
        assert_eq!(best_a, best_b);
        assert_eq!(score_a, score_b);
        assert_eq!(nodes_a, nodes_b);
    }

    #[test]
    fn balanced_endgame_is_level() {
        // Mirrored kings and pawns: the zero network plus no material swing
        // must stay at zero at depth 1
        let (best, score, _) = run_search("6k1/5ppp/8/8/8/8/5PPP/6K1 w - - 0 1", depth_limit(1));
        assert_eq!(score, 0);
        let board = build_board("6k1/5ppp/8/8/8/8/5PPP/6K1 w - - 0 1");
        let mut copy = board;
        assert!(copy.make_move(best));
    }

    #[test]
    fn finds_a_forced_mate() {
        // Kb3 boxes the king in; Rc1 mates next move whatever white plays
        let (best, score, _) = run_search("8/8/8/8/8/2k5/2r5/K7 b - - 0 1", depth_limit(4));
        assert!(score >= FOUND_MATE, "score {score} is not a mate score");
        assert_eq!(best.to_uci(false), "c3b3");
        assert_eq!(score, MATE - 3);
    }

    #[test]
    fn stalemate_scores_zero_with_no_move() {
        let (best, score, _) = run_search("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1", depth_limit(4));
        assert_eq!(score, 0);
        assert_eq!(best, Move::NONE);
        assert_eq!(legal_move_count(&build_board("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1")), 0);
    }

    #[test]
    fn completed_repetition_scores_zero() {
        fill_lmr_table();
        let mut td = ThreadData::for_tests();
        let mut board = build_board(STARTING_FEN);
        let mut history = vec![board.zobrist_hash];
        // Two full knight-shuffle cycles
        for uci in ["g1f3", "g8f6", "f3g1", "f6g8", "g1f3", "g8f6", "f3g1", "f6g8"] {
            let m = crate::moves::moves::from_uci(uci, &board).unwrap();
            assert!(board.make_move(m));
            history.push(board.zobrist_hash);
        }
        td.board = board;
        td.hash_history = history;
        td.limit = depth_limit(6);
        td.limit.start();
        let (_, score) = iterative_deepening(&mut td);
        assert_eq!(score, 0);
    }

    #[test]
    fn mate_scores_shrink_with_distance() {
        let (best, in_one, _) = run_search("8/8/8/8/8/1k6/7r/1K6 b - - 0 1", depth_limit(4));
        assert_eq!(best.to_uci(false), "h2h1");
        assert_eq!(in_one, MATE - 1);
        let (_, in_two, _) = run_search("8/8/8/8/8/2k5/2r5/K7 b - - 0 1", depth_limit(6));
        assert!(is_win(in_two));
        // A mate delivered later scores strictly lower
        assert!(in_one > in_two);
    }
}
