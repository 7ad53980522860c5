pub mod claim_writer;
