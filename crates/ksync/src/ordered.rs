//! 有序等待队列
//!
//! 信号量等待者、捐赠列表、条件变量等待者三处都需要“按优先级降序插入、唤醒前重排”，
//! 这里统一实现为由比较函数参数化的 [`OrderedQueue`]。

use alloc::collections::VecDeque;
use core::cmp::Ordering;

use crate::sched::{ThreadId, priority_of};

/// 排序谓词：`a` 是否应排在 `b` 之前（优先级严格更高）
pub type Outranks<T> = fn(&T, &T) -> bool;

/// 按线程有效优先级比较
///
/// 用于信号量等待队列与捐赠列表。
pub fn thread_outranks(a: &ThreadId, b: &ThreadId) -> bool {
    priority_of(*a) > priority_of(*b)
}

/// 按比较函数有序插入的队列
///
/// 队首总是排序意义上最优先的元素；相等的元素保持插入顺序。
#[derive(Debug, Clone)]
pub struct OrderedQueue<T> {
    items: VecDeque<T>,
}

impl<T> OrderedQueue<T> {
    /// 创建一个空队列
    pub const fn new() -> Self {
        OrderedQueue {
            items: VecDeque::new(),
        }
    }

    /// 插入到第一个被 `item` 严格压过的元素之前
    pub fn insert_ordered(&mut self, item: T, outranks: Outranks<T>) {
        let pos = self
            .items
            .iter()
            .position(|existing| outranks(&item, existing))
            .unwrap_or(self.items.len());
        self.items.insert(pos, item);
    }

    /// 按当前的比较结果稳定重排
    pub fn sort(&mut self, outranks: Outranks<T>) {
        self.items.make_contiguous().sort_by(|a, b| {
            if outranks(a, b) {
                Ordering::Less
            } else if outranks(b, a) {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        });
    }

    /// 弹出队首
    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// 查看队首
    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    /// 只保留满足 `keep` 的元素
    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.items.retain(keep);
    }

    /// 元素个数
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// 队列是否为空
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 从队首到队尾遍历
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.items.iter()
    }
}

impl<T: PartialEq> OrderedQueue<T> {
    /// 是否包含 `item`
    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    /// 移除 `item`（若存在）
    pub fn remove(&mut self, item: &T) -> Option<T> {
        let pos = self.items.iter().position(|x| x == item)?;
        self.items.remove(pos)
    }

    /// `item` 的优先级变化后，将其移动到新的位置
    ///
    /// 返回 `item` 是否在队列中。
    pub fn reposition(&mut self, item: &T, outranks: Outranks<T>) -> bool {
        match self.remove(item) {
            Some(item) => {
                self.insert_ordered(item, outranks);
                true
            }
            None => false,
        }
    }
}

impl<T> Default for OrderedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    // (优先级, 标签)
    type Item = (u8, char);

    fn higher(a: &Item, b: &Item) -> bool {
        a.0 > b.0
    }

    fn labels(q: &OrderedQueue<Item>) -> Vec<char> {
        q.iter().map(|&(_, c)| c).collect()
    }

    #[test]
    fn test_insert_descending() {
        let mut q = OrderedQueue::new();
        q.insert_ordered((5, 'a'), higher);
        q.insert_ordered((1, 'b'), higher);
        q.insert_ordered((9, 'c'), higher);
        assert_eq!(labels(&q), ['c', 'a', 'b']);
    }

    #[test]
    fn test_insert_equal_keeps_arrival_order() {
        let mut q = OrderedQueue::new();
        q.insert_ordered((3, 'a'), higher);
        q.insert_ordered((3, 'b'), higher);
        q.insert_ordered((7, 'c'), higher);
        q.insert_ordered((3, 'd'), higher);
        assert_eq!(labels(&q), ['c', 'a', 'b', 'd']);
    }

    #[test]
    fn test_sort_is_stable() {
        let mut q = OrderedQueue::new();
        for item in [(2, 'a'), (2, 'b'), (2, 'c')] {
            q.insert_ordered(item, higher);
        }
        // 模拟排队之后 'c' 的优先级被抬高
        q.retain(|&(_, c)| c != 'c');
        q.items.push_back((8, 'c'));
        q.items.push_back((2, 'd'));
        q.sort(higher);
        assert_eq!(labels(&q), ['c', 'a', 'b', 'd']);
    }

    #[test]
    fn test_reposition_moves_item() {
        let mut q: OrderedQueue<u32> = OrderedQueue::new();
        // 按数值大小排序
        fn larger(a: &u32, b: &u32) -> bool {
            a > b
        }
        for v in [4, 3, 1] {
            q.insert_ordered(v, larger);
        }
        assert!(q.reposition(&1, larger));
        assert!(!q.reposition(&42, larger));
        assert_eq!(q.len(), 3);
        assert_eq!(q.remove(&3), Some(3));
        assert_eq!(q.front(), Some(&4));
        assert!(q.contains(&1));
    }

    #[test]
    fn test_pop_front_drains_in_order() {
        let mut q = OrderedQueue::new();
        for item in [(1, 'x'), (6, 'y'), (4, 'z')] {
            q.insert_ordered(item, higher);
        }
        assert_eq!(q.pop_front(), Some((6, 'y')));
        assert_eq!(q.pop_front(), Some((4, 'z')));
        assert_eq!(q.pop_front(), Some((1, 'x')));
        assert!(q.pop_front().is_none());
        assert!(q.is_empty());
    }
}
