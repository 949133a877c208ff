use std::io;
use std::sync::Arc;

use itertools::Itertools;

use crate::bench::bench;
use crate::board::board::Board;
use crate::board::fen::{build_board, parse_fen_from_buffer, STARTING_FEN};
use crate::engine::perft::divide;
use crate::engine::wdl;
use crate::eval::accumulator::{AccumulatorStack, InputBucketCache};
use crate::eval::network::Network;
use crate::moves::moves::from_uci;
use crate::search::fill_lmr_table;
use crate::search::game_time::Limit;
use crate::search::thread::Searcher;
use crate::spsa;

/// Blocking UCI loop. Searches run on the worker pool, so `stop`, `isready`
/// and `quit` stay responsive while thinking.
pub fn main_loop() -> ! {
    let net: Arc<Network> = Arc::from(Network::startup());
    let mut searcher = Searcher::new(Arc::clone(&net));
    let mut board = build_board(STARTING_FEN);
    let mut hash_history = vec![board.zobrist_hash];
    let mut chess960 = false;
    fill_lmr_table();

    let mut buffer = String::new();
    loop {
        buffer.clear();
        if io::stdin().read_line(&mut buffer).unwrap_or(0) == 0 {
            // Stdin closed; let any running search finish and leave
            searcher.stop();
            searcher.wait_for_search_finished();
            std::process::exit(0);
        }
        let tokens: Vec<&str> = buffer.split_whitespace().collect();
        let Some(&command) = tokens.first() else { continue };

        match command {
            "uci" => {
                println!("id name Vesper 0.4");
                println!("id author the Vesper authors");
                println!("option name Hash type spin default 16 min 1 max 16777216");
                println!("option name Threads type spin default 1 min 1 max 1024");
                println!("option name UCI_ShowWDL type check default true");
                println!("option name UCI_Chess960 type check default false");
                println!("option name UseSoftNodes type check default false");
                println!("option name NormalizeEval type check default true");
                for param in spsa::PARAMS {
                    println!(
                        "option name {} type spin default {} min {} max {}",
                        param.name, param.default, param.min, param.max
                    );
                }
                println!("uciok");
            }
            "isready" => {
                searcher.wait_for_search_finished();
                println!("readyok");
            }
            "ucinewgame" => {
                searcher.reset();
                board = build_board(STARTING_FEN);
                board.chess960 = chess960;
                hash_history = vec![board.zobrist_hash];
            }
            "position" => {
                parse_position(&tokens, &mut board, &mut hash_history, chess960);
            }
            "go" => {
                if tokens.get(1) == Some(&"perft") {
                    let depth = tokens.get(2).and_then(|t| t.parse().ok()).unwrap_or(1);
                    divide(&board, depth);
                } else {
                    let limit = parse_go(&tokens, &board);
                    searcher.start_search(&board, limit, hash_history.clone());
                }
            }
            "stop" => searcher.stop(),
            "quit" => {
                searcher.stop();
                searcher.wait_for_search_finished();
                std::process::exit(0);
            }
            "setoption" => {
                set_option(&tokens, &mut searcher, &mut board, &mut chess960);
            }
            "bench" => bench(&mut searcher),
            "eval" => print_eval(&board, &searcher.net),
            "d" => print!("{board}"),
            "config" => spsa::print_ob_config(),
            _ => log::warn!("ignoring unrecognized command: {}", buffer.trim()),
        }
    }
}

fn parse_position(tokens: &[&str], board: &mut Board, hash_history: &mut Vec<u64>, chess960: bool) {
    match tokens.get(1) {
        Some(&"startpos") => *board = build_board(STARTING_FEN),
        Some(&"fen") => *board = build_board(&parse_fen_from_buffer(tokens)),
        _ => {
            log::warn!("ignoring malformed position command");
            return;
        }
    }
    board.chess960 = chess960;
    hash_history.clear();
    hash_history.push(board.zobrist_hash);

    if let Some(moves_at) = tokens.iter().position(|&t| t == "moves") {
        for token in &tokens[moves_at + 1..] {
            let Some(m) = from_uci(token, board) else {
                log::warn!("ignoring unparseable move {token}");
                break;
            };
            if !board.is_pseudo_legal(m) || !board.make_move(m) {
                log::warn!("ignoring illegal move {token}");
                break;
            }
            hash_history.push(board.zobrist_hash);
        }
    }
}

fn parse_go(tokens: &[&str], board: &Board) -> Limit {
    let mut limit = Limit::default();
    let stm_time = if board.stm == crate::types::pieces::Color::White { "wtime" } else { "btime" };
    let stm_inc = if board.stm == crate::types::pieces::Color::White { "winc" } else { "binc" };

    for (key, value) in tokens.iter().skip(1).tuples() {
        let Ok(value) = value.parse::<i64>() else { continue };
        match *key {
            "movetime" => limit.movetime = value,
            "depth" => limit.depth = value as i32,
            "nodes" => limit.max_nodes = value,
            "softnodes" => limit.soft_nodes = value,
            key if key == stm_time => limit.ctime = value,
            key if key == stm_inc => limit.inc = value,
            _ => {}
        }
    }
    if tokens.contains(&"infinite") {
        limit = Limit::default();
    }
    if limit.movetime != 0 || limit.depth != 0 {
        limit.ctime = 0;
        limit.inc = 0;
    }
    limit
}

fn set_option(tokens: &[&str], searcher: &mut Searcher, board: &mut Board, chess960: &mut bool) {
    let name = tokens.iter().position(|&t| t == "name").and_then(|i| tokens.get(i + 1));
    let value = tokens.iter().position(|&t| t == "value").and_then(|i| tokens.get(i + 1));
    let (Some(&name), Some(&value)) = (name, value) else {
        log::warn!("ignoring malformed setoption");
        return;
    };

    match name {
        "Hash" => {
            if let Ok(mb) = value.parse() {
                searcher.resize_tt(mb);
            }
        }
        "Threads" => {
            if let Ok(threads) = value.parse() {
                searcher.set_threads(threads);
            }
        }
        "UCI_ShowWDL" => searcher.show_wdl = value == "true",
        "UCI_Chess960" => {
            *chess960 = value == "true";
            board.chess960 = *chess960;
        }
        "UseSoftNodes" => searcher.use_soft_nodes = value == "true",
        "NormalizeEval" => searcher.normalize = value == "true",
        _ => {
            let Ok(parsed) = value.parse() else {
                log::warn!("ignoring non-integer value for {name}");
                return;
            };
            if spsa::set_param(name, parsed) {
                // The reduction table bakes several parameters in
                fill_lmr_table();
            } else {
                log::warn!("ignoring unknown option {name}");
            }
        }
    }
}

fn print_eval(board: &Board, net: &Network) {
    let mut stack = AccumulatorStack::new();
    let mut cache = InputBucketCache::default();
    stack.reset(net, board, &mut cache);
    let raw = net.inference(board, stack.top());
    println!("Raw: {raw}");
    println!("Normalized: {}", wdl::normalize_eval(raw, board));
}

#[cfg(test)]
mod uci_tests {
    use super::*;

    #[test]
    fn go_tokens_build_limits() {
        let board = build_board(STARTING_FEN);
        let limit = parse_go(&["go", "wtime", "60000", "btime", "30000", "winc", "500", "binc", "250"], &board);
        assert_eq!(limit.ctime, 60_000);
        assert_eq!(limit.inc, 500);

        let limit = parse_go(&["go", "depth", "12"], &board);
        assert_eq!(limit.depth, 12);
        assert_eq!(limit.ctime, 0);

        let limit = parse_go(&["go", "nodes", "5000", "softnodes", "1000"], &board);
        assert_eq!(limit.max_nodes, 5_000);
        assert_eq!(limit.soft_nodes, 1_000);

        let limit = parse_go(&["go", "wtime", "1000", "infinite"], &board);
        assert_eq!(limit.ctime, 0);
        assert_eq!(limit.max_nodes, -1);
    }

    #[test]
    fn position_with_moves_builds_history() {
        let mut board = build_board(STARTING_FEN);
        let mut history = vec![board.zobrist_hash];
        parse_position(
            &["position", "startpos", "moves", "e2e4", "e7e5", "g1f3"],
            &mut board,
            &mut history,
            false,
        );
        assert_eq!(history.len(), 4);
        assert_eq!(*history.last().unwrap(), board.zobrist_hash);
        assert_eq!(board.full_moves, 2);
    }

    #[test]
    fn malformed_input_changes_nothing() {
        let mut board = build_board(STARTING_FEN);
        let before = board.zobrist_hash;
        let mut history = vec![before];
        parse_position(&["position", "startpos", "moves", "zzzz"], &mut board, &mut history, false);
        assert_eq!(board.zobrist_hash, before);
        assert_eq!(history.len(), 1);
    }
}
