fn main() {
    stem_pipeline::cli::run();
}
