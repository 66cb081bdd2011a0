pub mod serving;
