pub mod symbol_map;

pub use symbol_map::SymbolMapper;
