mod cli_test;
mod disprove_test;
mod filter_test;
