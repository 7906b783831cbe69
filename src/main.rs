fn main() {
    elf2e32::tool_main();
}
