fn main() {
    std::process::exit(beadloom::run());
}
