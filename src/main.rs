#![allow(clippy::module_inception)]
#![allow(clippy::cast_possible_truncation)]

mod bench;
mod board;
mod engine;
mod eval;
mod moves;
mod search;
mod spsa;
mod types;

use std::env;
use std::sync::Arc;

use crate::bench::bench;
use crate::engine::uci::main_loop;
use crate::eval::network::Network;
use crate::search::fill_lmr_table;
use crate::search::thread::Searcher;

fn main() {
    fill_lmr_table();
    if env::args().any(|arg| arg == "bench") {
        let net: Arc<Network> = Arc::from(Network::startup());
        let mut searcher = Searcher::new(net);
        bench(&mut searcher);
    } else {
        main_loop();
    }
}
