use crate::{common::word::Word, executor::ExecutorError};

pub const STACK_LIMIT: usize = 1024;

/// LIFO operand stack bounded by [`STACK_LIMIT`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Stack {
    items: Vec<Word>,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Bottom-to-top view.
    pub fn as_slice(&self) -> &[Word] {
        &self.items
    }

    pub fn push(&mut self, value: Word) -> Result<(), ExecutorError> {
        if self.items.len() >= STACK_LIMIT {
            return Err(ExecutorError::StackOverflow);
        }
        self.items.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Word, ExecutorError> {
        self.items.pop().ok_or(ExecutorError::StackUnderflow)
    }

    pub fn pop_n<const N: usize>(&mut self) -> Result<[Word; N], ExecutorError> {
        self.require(N)?;
        let mut out = [Word::zero(); N];
        for slot in out.iter_mut() {
            *slot = self.pop()?;
        }
        Ok(out)
    }

    /// `n`-th item from the top, 0 being the top.
    pub fn peek(&self, n: usize) -> Result<&Word, ExecutorError> {
        self.require(n + 1)?;
        Ok(&self.items[self.items.len() - 1 - n])
    }

    pub fn require(&self, n: usize) -> Result<(), ExecutorError> {
        if self.items.len() < n {
            return Err(ExecutorError::StackUnderflow);
        }
        Ok(())
    }

    /// DUPn: copies the `n`-th item (1-based) to the top.
    pub fn dup(&mut self, n: usize) -> Result<(), ExecutorError> {
        let value = *self.peek(n - 1)?;
        self.push(value)
    }

    /// SWAPn: exchanges the top with the `n + 1`-th item.
    pub fn swap(&mut self, n: usize) -> Result<(), ExecutorError> {
        self.require(n + 1)?;
        let top = self.items.len() - 1;
        self.items.swap(top, top - n);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_at_limit() {
        let mut stack = Stack::new();
        for i in 0..STACK_LIMIT {
            stack.push(Word::from(i)).unwrap();
        }
        assert!(matches!(
            stack.push(Word::zero()),
            Err(ExecutorError::StackOverflow)
        ));
        assert_eq!(stack.len(), STACK_LIMIT);
    }

    #[test]
    fn test_underflow() {
        let mut stack = Stack::new();
        assert!(matches!(stack.pop(), Err(ExecutorError::StackUnderflow)));
        stack.push(Word::one()).unwrap();
        assert!(matches!(stack.pop_n::<2>(), Err(ExecutorError::StackUnderflow)));
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_dup_swap() {
        let mut stack = Stack::new();
        stack.push(Word::from(1)).unwrap();
        stack.push(Word::from(2)).unwrap();
        stack.push(Word::from(3)).unwrap();

        stack.dup(3).unwrap();
        assert_eq!(*stack.peek(0).unwrap(), Word::from(1));

        stack.swap(3).unwrap();
        assert_eq!(
            stack.as_slice(),
            &[Word::from(1), Word::from(2), Word::from(3), Word::from(1)]
        );
        assert!(stack.swap(4).is_err());
        assert!(stack.dup(5).is_err());
    }
}
