pub mod generation_record;
