pub mod lexer;
pub mod parser;
pub mod parser_error;
pub mod preprocessor;
pub mod str_pool;
pub mod token;
pub mod token_dumper;
