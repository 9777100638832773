#[cfg(test)]
mod end_to_end;
